//! Prompt construction for the decision oracle.
//!
//! The system prompt pins the JSON contract; the per-iteration prompt
//! carries task, page fingerprint, action history, and the numbered
//! element list matching the marked screenshot.

use super::DecisionRequest;
use std::fmt::Write;

pub const SYSTEM_PROMPT: &str = r#"You are an expert web automation assistant using set-of-marks navigation.

The screenshot shows NUMBERED RED BOXES on interactive elements.
Refer to elements by their NUMBER - no need to describe them.

Respond ONLY with valid JSON:
{
  "action": "click|fill|scroll|wait|done|abort",
  "element_id": number (the red box number from the screenshot),
  "text": "text to type (for fill actions only)",
  "description": "brief description of what you're doing",
  "reasoning": "why you chose this action"
}

Action types:
- click: Click an element -> specify element_id
- fill: Fill a text field -> specify element_id + text to type
- scroll: Scroll the page when the target is likely below the fold
- wait: Wait for the page to finish loading
- done: Task complete -> ONLY when you see confirmation!
- abort: The task cannot be completed on this page

CRITICAL RULES:
1. If you see a blocking popup or modal -> dismiss it first (look for X, "Got it", "OK", "Close")

2. After clicking a button that creates or adds something:
   - Look for the NEW input field that just appeared
   - Fill the input that is CLOSEST to where you clicked
   - Avoid filling inputs in headers, navigation bars, or search boxes

3. Prefer elements in the MAIN CONTENT AREA over sidebar or header elements

4. If you see a text input with a cursor or placeholder -> fill it with the required text
5. For CREATE tasks -> only mark "done" when you SEE the created item by name in the list
6. Don't mark "done" prematurely -> verify the result is visible first

Lower numbers roughly correspond to more important elements. The numbers make
disambiguation easy - just pick the right number."#;

/// User prompt for one decision. The initial iteration gets a shorter
/// framing; later iterations carry page state and history.
pub fn decision_prompt(request: &DecisionRequest<'_>) -> String {
    let mut prompt = String::new();

    if request.is_initial {
        let _ = writeln!(
            prompt,
            "You are starting a new task. Analyze the screenshot and decide the FIRST action.\n"
        );
        let _ = writeln!(prompt, "Task: {}", request.task);
        let _ = writeln!(prompt, "App: {}", request.app);
        let _ = writeln!(prompt, "Current URL: {}\n", request.page.url);
        let _ = writeln!(
            prompt,
            "CHECK FOR POPUPS FIRST: if you see \"Got it\", \"Accept\", \"Close\", dismiss it.\n\
             Do NOT return \"done\" on the first action; tasks require multiple steps.\n"
        );
    } else {
        let _ = writeln!(
            prompt,
            "Continue working on the task. Analyze the screenshot and decide the NEXT action.\n"
        );
        let _ = writeln!(prompt, "Task: {}", request.task);
        let _ = writeln!(prompt, "Current URL: {}", request.page.url);
        let _ = writeln!(prompt, "Page Title: {}\n", request.page.title);
        let _ = writeln!(prompt, "Previous actions taken:");
        if request.history.is_empty() {
            let _ = writeln!(prompt, "  (none)");
        } else {
            for (i, entry) in request.history.iter().enumerate() {
                let _ = writeln!(prompt, "  {}. {:?}: {}", i + 1, entry.action, entry.description);
            }
        }
        let _ = writeln!(
            prompt,
            "\nCurrent state:\n- Modals open: {}\n- Interactive elements: {}\n",
            request.page.modal_count, request.page.element_count
        );
    }

    if let Some(note) = request.corrective_note {
        let _ = writeln!(prompt, "IMPORTANT: {}\n", note);
    }

    let _ = writeln!(prompt, "{}", request.mapping.element_list_text());
    let _ = write!(prompt, "\nRemember: respond ONLY with valid JSON.");
    prompt
}

pub fn query_parser_prompt(query: &str) -> String {
    format!(
        r#"Parse this user query and extract the app name and task description.

Query: {query}

Respond ONLY with valid JSON in this exact format:
{{
  "app": "name of the application (lowercase, e.g. 'asana', 'github', 'jira')",
  "task": "concise task description"
}}

Instructions:
- Extract the app name from the query (e.g. "Asana" -> "asana")
- If no specific app is mentioned, use "other"
- Extract the core task the user wants to perform"#
    )
}
