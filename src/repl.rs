use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::OnceLock;

use crossterm::style::{Attribute, Stylize};
use reedline::{
    FileBackedHistory, Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus,
    Reedline, Signal,
};
use tracing::{debug, warn};

/// Entries kept in the history file
const HISTORY_CAPACITY: usize = 1000;

const PRIMARY_PROMPT: &str = ">>> ";
const CONTINUATION_PROMPT: &str = "... ";

struct HostPrompt {
    is_continuation: bool,
}

impl Prompt for HostPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        let text = if self.is_continuation {
            CONTINUATION_PROMPT
        } else {
            PRIMARY_PROMPT
        };
        // Reset first so script output colors never leak into the prompt
        Cow::Owned(format!("{}{}", Attribute::Reset, text))
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _mode: PromptEditMode) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_history_search_indicator(
        &self,
        history_search: PromptHistorySearch,
    ) -> Cow<'_, str> {
        let prefix = match history_search.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        Cow::Owned(format!("({}reverse search) ", prefix))
    }
}

/// Decides whether the buffered input is a complete statement
pub type StatementChecker = Box<dyn Fn(&str) -> bool + Send + Sync>;
static STATEMENT_CHECKER: OnceLock<StatementChecker> = OnceLock::new();

pub fn set_statement_checker(checker: StatementChecker) {
    STATEMENT_CHECKER.set(checker).ok();
}

fn is_complete_statement(code: &str) -> bool {
    match STATEMENT_CHECKER.get() {
        Some(checker) => checker(code),
        // Without a checker every line stands alone
        None => true,
    }
}

/// What the REPL does after a statement ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The statement asked the host to exit with this status
    Exit(i32),
}

pub type CodeExecutor = Box<dyn Fn(&str) -> anyhow::Result<Flow> + Send + Sync>;
static CODE_EXECUTOR: OnceLock<CodeExecutor> = OnceLock::new();

pub fn set_code_executor(executor: CodeExecutor) {
    CODE_EXECUTOR.set(executor).ok();
}

fn line_editor(history: Option<PathBuf>) -> Reedline {
    let editor = Reedline::create();
    let Some(path) = history else {
        return editor;
    };
    match FileBackedHistory::with_file(HISTORY_CAPACITY, path.clone()) {
        Ok(history) => editor.with_history(Box::new(history)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "REPL history unavailable");
            editor
        }
    }
}

/// Read, check and execute statements until end of input.
///
/// Returns the exit status a statement requested, or `None` on Ctrl+D.
pub fn run(history: Option<PathBuf>) -> anyhow::Result<Option<i32>> {
    let mut line_editor = line_editor(history);
    let mut buffer = String::new();
    let mut prompt = HostPrompt {
        is_continuation: false,
    };

    println!("script-host REPL");
    println!("Type 'exit()' or press Ctrl+D to quit");
    println!();

    loop {
        prompt.is_continuation = !buffer.is_empty();

        match line_editor.read_line(&prompt)? {
            Signal::Success(line) => {
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(&line);

                if !is_complete_statement(&buffer) {
                    continue;
                }
                let statement = std::mem::take(&mut buffer);
                if statement.trim().is_empty() {
                    continue;
                }
                let Some(executor) = CODE_EXECUTOR.get() else {
                    continue;
                };
                match executor(&statement) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Exit(status)) => {
                        debug!(status, "REPL exit requested");
                        return Ok(Some(status));
                    }
                    Err(e) => eprintln!("{}", format!("Error executing code: {e}").red()),
                }
            }
            Signal::CtrlC => {
                println!("^C");
                buffer.clear();
            }
            Signal::CtrlD => return Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_switches_on_continuation() {
        let primary = HostPrompt {
            is_continuation: false,
        };
        let continuation = HostPrompt {
            is_continuation: true,
        };

        assert_eq!(
            primary.render_prompt_left(),
            format!("{}>>> ", Attribute::Reset)
        );
        assert_eq!(
            continuation.render_prompt_left(),
            format!("{}... ", Attribute::Reset)
        );
    }
}
