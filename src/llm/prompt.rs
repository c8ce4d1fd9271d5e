use crate::config::RepairPromptStyle;

/// Role-framed prompt: one system instruction plus one user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmPrompt {
    pub system: String,
    pub user: String,
}

/// Marker the oracle is asked to emit when self-refinement should stop.
pub const NO_IMPROVEMENTS: &str = "No improvements needed";

/* ============================================================
   System prompts (stable, reused)
   ============================================================ */

fn assistant_system() -> String {
    "You are a code assistant.".to_string()
}

fn repair_system() -> String {
    r#"
You are provided with a piece of Python code that has a bug.
Carefully examine the code, identify the bug, and provide a corrected version.
Explain the cause of the bug and how it was fixed.
Return the complete corrected code in a single ```python fenced block.
"#
    .trim()
    .to_string()
}

/* ============================================================
   User prompts
   ============================================================ */

/// Prompt that produces the first candidate for a problem.
pub fn solve_text(problem: &str) -> String {
    format!("Solve the following problem:\n{problem}")
}

pub fn generation_prompt(user: &str) -> LlmPrompt {
    LlmPrompt {
        system: assistant_system(),
        user: user.to_string(),
    }
}

/// Prompt that asks the oracle to repair `code` given the failure `diagnostic`.
pub fn repair_prompt(
    style: RepairPromptStyle,
    task_prompt: &str,
    code: &str,
    diagnostic: &str,
) -> LlmPrompt {
    let mut out = String::new();

    out.push_str("TASK\n");
    out.push_str(task_prompt.trim_end());
    out.push_str("\n\n");

    match style {
        RepairPromptStyle::Debug => {
            out.push_str("The following code has an error:\n\n");
            out.push_str(code);
            out.push_str("\n\nError message:\n");
            out.push_str(diagnostic);
            out.push_str("\n\nPlease fix the code.");
        }
        RepairPromptStyle::Explain => {
            out.push_str("The following code has an error:\n");
            out.push_str(diagnostic);
            out.push_str(
                "\n\nPlease explain the original code step by step. \
                 Then fix the bug and provide the full code. The original code:\n\n",
            );
            out.push_str(code);
            out.push('\n');
        }
    }

    LlmPrompt {
        system: repair_system(),
        user: out,
    }
}

pub fn feedback_prompt(code: &str) -> LlmPrompt {
    generation_prompt(&format!(
        "Here is the generated code:\n{code}\n\
         Please provide feedback for improvement or correctness. \
         If the code is already correct, reply with \"{NO_IMPROVEMENTS}\"."
    ))
}

pub fn improve_prompt(problem_prompt: &str, code: &str, feedback: &str) -> LlmPrompt {
    generation_prompt(&format!(
        "{problem_prompt}\n\nCurrent code:\n{code}\n\n\
         Improve this code based on the feedback: {feedback}"
    ))
}
