use crate::tracker::types::TicketComment;
use crate::workflow::parsers::{head_chars, tail_chars};
use crate::workflow::state::{CodeChange, WorkflowState};

pub const ROUTER_SYSTEM: &str = "You route work between the steps of an automated development workflow.";
pub const PLANNER_SYSTEM: &str = "You are a pragmatic software planner.";
pub const IMPLEMENTER_SYSTEM: &str = "You are an expert React developer who writes tests first.";
pub const REVIEWER_SYSTEM: &str = "You judge whether existing code satisfies a ticket.";
pub const DEBUGGER_SYSTEM: &str = "You are an expert at debugging React and JavaScript test failures.";

/// Situation summary handed to the Router's completion call.
pub fn routing_prompt(state: &WorkflowState) -> String {
    let test_results = match &state.test_results {
        Some(r) => format!("passed={}, iterations={}", r.success, state.test_iterations),
        None => "not run".to_string(),
    };

    format!(
        r#"Decide which step of the ticket workflow runs next.

## Steps
- planner: fetch the ticket and write an implementation plan. Use when there is no plan yet.
- implementer: prepare the branch and write code. Use when a plan exists but no code does, or when tests failed and fix suggestions are waiting.
- tester: run the test suite. Use when code changes exist but have not been tested, or when implementation was skipped because existing code already covers the ticket.
- reporter: commit, push, open or update the pull request and notify. Use when tests passed.
- done: nothing left to do. Use when a pull request exists.

## Current State
- Ticket: {ticket}
- Status: {status}
- Has ticket details: {has_details}
- Has implementation plan: {has_plan}
- Has code changes: {has_changes}
- Skip implementation: {skip}
- Test results: {test_results}
- Test iterations: {iterations}
- Has fix suggestions: {has_fix}
- Has pull request: {has_pr}
- Error: {error}

Reply with a single JSON object and nothing else:
{{"route": "planner|implementer|tester|reporter|done", "confidence": 0.0-1.0, "reason": "one sentence"}}"#,
        ticket = if state.ticket_id.is_empty() { "(none)" } else { state.ticket_id.as_str() },
        status = state.status,
        has_details = state.ticket_details.is_some(),
        has_plan = state.has_plan(),
        has_changes = !state.code_changes.is_empty(),
        skip = state.skip_implementation,
        iterations = state.test_iterations,
        has_fix = state.fix_suggestions.is_some(),
        has_pr = state.pr_url.is_some(),
        error = state.error.as_deref().unwrap_or("(none)"),
    )
}

pub fn planning_prompt(
    ticket_id: &str,
    summary: &str,
    description: Option<&str>,
    status: &str,
    priority: &str,
    attachments: &[String],
    comments: &[TicketComment],
) -> String {
    let comments_section = if comments.is_empty() {
        String::new()
    } else {
        let lines: Vec<String> = comments
            .iter()
            .map(|c| format!("- {}: {}", c.author, head_chars(&c.body, 300)))
            .collect();
        format!("\n## Recent Comments (newest first)\n{}\n", lines.join("\n"))
    };

    let attachments_section = if attachments.is_empty() {
        String::new()
    } else {
        format!("\n**Attachments:** {}\n", attachments.join(", "))
    };

    format!(
        r#"Write an implementation plan for ticket {ticket_id}.

## Ticket
**Summary:** {summary}
**Status:** {status}
**Priority:** {priority}

**Description:**
{description}
{attachments_section}{comments_section}
## Instructions
The plan must cover:
1. Which components or files to create or change.
2. The key implementation details.
3. The test cases to write.
4. Edge cases worth handling.

Keep it short and actionable. Fold any requirements or clarifications from the comments into the plan."#,
        description = description.unwrap_or("No description provided"),
    )
}

/// Plan used when no completion provider is configured.
pub fn default_plan(summary: &str, description: Option<&str>) -> String {
    format!(
        r#"Implementation Plan for: {summary}

1. Analyze requirements from description
2. Create necessary components/files
3. Implement core functionality
4. Write unit tests
5. Run tests and fix any failures
6. Commit and push changes

Description:
{}
"#,
        description.unwrap_or("No description provided")
    )
}

/// Extra material for the code-generation prompt: ticket comments, the last
/// failed run with its fix suggestions, and what a previous attempt left on the branch.
pub fn implementation_context(state: &WorkflowState) -> String {
    let mut sections = Vec::new();

    if let Some(details) = &state.ticket_details {
        if !details.recent_comments.is_empty() {
            let lines: Vec<String> = details
                .recent_comments
                .iter()
                .take(3)
                .map(|c| format!("- {}: {}", c.author, head_chars(&c.body, 200)))
                .collect();
            sections.push(format!("## Ticket Comments\n{}", lines.join("\n")));
        }
    }

    if let Some(fixes) = &state.fix_suggestions {
        let output = state
            .test_results
            .as_ref()
            .map(|r| tail_chars(&r.output, 1000))
            .unwrap_or_default();
        sections.push(format!("## Previous Test Failures\n{output}"));
        sections.push(format!("## Fix Suggestions\n{fixes}"));
    }

    if let Some(existing) = &state.existing_context {
        if !existing.commits.is_empty() {
            sections.push(format!("## Prior Commits\n{}", existing.commits));
        }
        if !existing.pr_comments.is_empty() {
            sections.push(format!("## PR Comments\n{}", existing.pr_comments));
        }
        if !existing.review_comments.is_empty() {
            sections.push(format!("## Review Comments\n{}", existing.review_comments));
        }
    }

    sections.join("\n\n")
}

pub fn implementation_prompt(state: &WorkflowState, context: &str) -> String {
    let summary = match state.summary() {
        "" => "Feature implementation",
        s => s,
    };

    format!(
        r#"Implement ticket {ticket} on branch `{branch}`.

**Summary:** {summary}

## Implementation Plan
{plan}

{context}

## Instructions
Work test-first: every component or function gets a test file.
For each feature, give the test file first (for example `src/components/__tests__/Widget.test.jsx`), then the implementation (`src/components/Widget.jsx`).

- Use Jest and React Testing Library; cover rendering, props and interactions with two or three cases per component.
- Give every file as its path relative to the project root on its own line, followed by the complete content in a fenced code block.
- Keep the code clean, with correct imports and PropTypes or TypeScript types where they fit."#,
        ticket = state.ticket_id,
        branch = state.branch_name,
        plan = state.implementation_plan,
    )
}

pub fn completion_check_prompt(
    ticket_id: &str,
    summary: &str,
    description: Option<&str>,
    existing_code: &str,
    commit_history: &str,
) -> String {
    format!(
        r#"Check whether the code already on this branch satisfies ticket {ticket_id}.

## Ticket
**Summary:** {summary}

**Description:**
{description}

## Existing Code
{existing_code}

## Commit History
{commit_history}

Reply with JSON: {{"complete": true|false, "reason": "one sentence"}}"#,
        description = description
            .map(|d| head_chars(d, 1000))
            .unwrap_or_else(|| "No description".to_string()),
        existing_code = head_chars(existing_code, 2000),
    )
}

pub fn fix_prompt(test_output: &str, summary: &str, changes: &[CodeChange]) -> String {
    let changes_section: Vec<String> = changes
        .iter()
        .take(3)
        .map(|c| format!("File: {}\n```\n{}...\n```", c.file_path, head_chars(&c.content, 500)))
        .collect();

    format!(
        r#"The test suite failed. Work out why and propose fixes.

## Test Output
{output}

## Failure Summary
{summary}

## Current Code Changes
{changes}

For each file that needs to change, name the problem and give the corrected code.
Fix the real defect; do not weaken the tests."#,
        output = tail_chars(test_output, 1500),
        changes = changes_section.join("\n"),
    )
}
