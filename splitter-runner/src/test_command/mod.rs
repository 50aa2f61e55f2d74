// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command templates for test frameworks.
//!
//! A template is a shell-like command line containing placeholders. Templates are split into
//! words with POSIX shell quoting rules when they're parsed, and placeholders are substituted
//! into the resulting words when the command is rendered. Substituted values are therefore never
//! re-split: a test path containing a space stays a single argument.

use crate::errors::CommandTemplateError;
use std::fmt;

#[cfg(unix)]
#[path = "unix.rs"]
mod os;

#[cfg(windows)]
#[path = "windows.rs"]
mod os;

/// Placeholder for the test identifiers to run.
///
/// A word that consists of only this placeholder expands to one argument per identifier. If the
/// placeholder appears inside a larger word, the identifiers are joined with spaces. If a
/// template doesn't mention it at all, the identifiers are appended to the end of the command.
pub const TEST_EXAMPLES_PLACEHOLDER: &str = "{{testExamples}}";

/// Placeholder for the path to the framework's structured result file.
pub const OUTPUT_FILE_PLACEHOLDER: &str = "{{outputFile}}";

/// Placeholder for the pattern matching failed test names, in retry commands.
pub const TEST_NAME_PATTERN_PLACEHOLDER: &str = "{{testNamePattern}}";

/// A parsed primary command template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandTemplate {
    template: String,
    words: Vec<String>,
}

impl CommandTemplate {
    /// Parses a command template.
    ///
    /// Returns an error if the template has unbalanced quotes, is empty, or starts with a
    /// placeholder.
    pub fn parse(template: &str) -> Result<Self, CommandTemplateError> {
        let words = split_template(template)?;
        Ok(Self {
            template: template.to_owned(),
            words,
        })
    }

    /// Returns the template as it was written.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Returns true if the template contains `placeholder`.
    pub fn contains(&self, placeholder: &str) -> bool {
        self.words.iter().any(|word| word.contains(placeholder))
    }

    /// Renders the template for the given test identifiers and result file.
    pub fn render<S: AsRef<str>>(&self, test_examples: &[S], output_file: &str) -> TestCommand {
        let mut words = Vec::with_capacity(self.words.len() + test_examples.len());
        let mut spliced = false;

        for word in &self.words {
            if word == TEST_EXAMPLES_PLACEHOLDER {
                words.extend(test_examples.iter().map(|example| example.as_ref().to_owned()));
                spliced = true;
            } else if word.contains(TEST_EXAMPLES_PLACEHOLDER) {
                let joined = join_examples(test_examples);
                words.push(
                    word.replace(TEST_EXAMPLES_PLACEHOLDER, &joined)
                        .replace(OUTPUT_FILE_PLACEHOLDER, output_file),
                );
                spliced = true;
            } else {
                words.push(word.replace(OUTPUT_FILE_PLACEHOLDER, output_file));
            }
        }

        if !spliced {
            words.extend(test_examples.iter().map(|example| example.as_ref().to_owned()));
        }

        TestCommand::from_words(words)
    }
}

/// A parsed retry command template.
///
/// Unlike [`CommandTemplate`], a retry template must contain [`TEST_NAME_PATTERN_PLACEHOLDER`]:
/// without it a retry would run every test again.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryCommandTemplate {
    template: String,
    words: Vec<String>,
}

impl RetryCommandTemplate {
    /// Parses a retry command template.
    pub fn parse(template: &str) -> Result<Self, CommandTemplateError> {
        let words = split_template(template)?;
        if !words
            .iter()
            .any(|word| word.contains(TEST_NAME_PATTERN_PLACEHOLDER))
        {
            return Err(CommandTemplateError::MissingPlaceholder {
                template: template.to_owned(),
                placeholder: TEST_NAME_PATTERN_PLACEHOLDER,
            });
        }

        Ok(Self {
            template: template.to_owned(),
            words,
        })
    }

    /// Returns the template as it was written.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Renders the template for the given failed test names and result file.
    ///
    /// The names are never appended to the command: they only appear where the pattern
    /// placeholder is.
    pub fn render<S: AsRef<str>>(&self, failed_names: &[S], output_file: &str) -> TestCommand {
        let pattern = test_name_pattern(failed_names);
        let words = self
            .words
            .iter()
            .map(|word| {
                word.replace(TEST_NAME_PATTERN_PLACEHOLDER, &pattern)
                    .replace(OUTPUT_FILE_PLACEHOLDER, output_file)
            })
            .collect();
        TestCommand::from_words(words)
    }
}

/// Builds the alternation pattern used to select failed tests: `(name1|name2|...)`.
///
/// Names are used verbatim. Characters that are special in the framework's pattern syntax are
/// not escaped, so a name containing them may select more or fewer tests than intended.
pub fn test_name_pattern<S: AsRef<str>>(names: &[S]) -> String {
    let mut pattern = String::from("(");
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            pattern.push('|');
        }
        pattern.push_str(name.as_ref());
    }
    pattern.push(')');
    pattern
}

fn split_template(template: &str) -> Result<Vec<String>, CommandTemplateError> {
    let words = shell_words::split(template).map_err(|err| CommandTemplateError::Parse {
        template: template.to_owned(),
        err,
    })?;

    match words.first() {
        None => Err(CommandTemplateError::Empty),
        Some(program) if is_placeholder(program) => Err(CommandTemplateError::PlaceholderProgram {
            template: template.to_owned(),
        }),
        Some(_) => Ok(words),
    }
}

fn is_placeholder(word: &str) -> bool {
    [
        TEST_EXAMPLES_PLACEHOLDER,
        OUTPUT_FILE_PLACEHOLDER,
        TEST_NAME_PATTERN_PLACEHOLDER,
    ]
    .contains(&word)
}

fn join_examples<S: AsRef<str>>(test_examples: &[S]) -> String {
    test_examples
        .iter()
        .map(|example| example.as_ref())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A fully rendered command, ready to be spawned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCommand {
    program: String,
    args: Vec<String>,
}

impl TestCommand {
    /// Creates a new command from a program and its arguments.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn from_words(mut words: Vec<String>) -> Self {
        // Templates are checked to be non-empty when parsed.
        let program = if words.is_empty() {
            String::new()
        } else {
            words.remove(0)
        };
        Self {
            program,
            args: words,
        }
    }

    /// Returns the program to run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the program followed by its arguments.
    pub fn words(&self) -> impl Iterator<Item = &str> + '_ {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }

    /// Appends arguments to the command.
    pub fn push_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
    }

    /// Builds a process command that inherits standard input, output and error.
    ///
    /// On Unix the process is placed in its own process group, so signals can be forwarded to
    /// the test framework and any processes it starts.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&self.args);
        os::set_process_group(&mut cmd);
        cmd.into()
    }
}

impl fmt::Display for TestCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_words::join(self.words()))
    }
}
