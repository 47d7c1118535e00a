//! Prompt templates for the generation and synthesis calls.
//!
//! Plain functions over the run state's text fields. Report rendering is
//! hand-rolled so prompt building can never fail.

use remorph_types::TestReport;

use crate::extract::{CLOSE_MARKER, OPEN_MARKER};

/// The numbered instruction block shared by both generation prompts. The
/// keep-name clause is dropped when the original code defines no function.
fn response_contract(body_hint: &str, function_name: Option<&str>) -> String {
    let mut contract = String::from("IMPORTANT:\n");
    let mut n = 1;
    if function_name.is_some() {
        contract.push_str(&format!(
            "{n}. Keep the EXACT same function name and signature as the original code\n"
        ));
        n += 1;
    }
    contract.push_str(&format!(
        "{n}. Format your response exactly as follows:\n\n{OPEN_MARKER}\n{body_hint}\n"
    ));
    if let Some(name) = function_name {
        contract.push_str(&format!("# KEEP THE ORIGINAL FUNCTION NAME: {name}\n"));
    }
    contract.push_str(&format!("{CLOSE_MARKER}\n"));
    contract
}

/// Prompt for the first refactor attempt.
pub fn initial_refactor(
    original_code: &str,
    rules: &str,
    test_cases: &str,
    function_name: Option<&str>,
) -> String {
    let contract = response_contract(
        "# Your refactored Python code here, including imports and docstring",
        function_name,
    );
    format!(
        "You are a Python code refactoring assistant. Your task is to refactor the given code according to the requirements.\n\
         {contract}\n\
         Original Code:\n{original_code}\n\n\
         Requirements:\n{rules}\n\n\
         Test Cases:\n{test_cases}\n\n\
         Return ONLY the refactored Python code between the {OPEN_MARKER} tags."
    )
}

/// Prompt for a repair attempt: the current candidate plus the report that
/// failed it.
pub fn repair(
    current_code: &str,
    report: Option<&TestReport>,
    rules: &str,
    function_name: Option<&str>,
) -> String {
    let contract = response_contract(
        "# Your fixed Python code here, including imports and docstring",
        function_name,
    );
    let results = match report {
        Some(report) => render_report(report),
        None => "(no test report)\n".to_string(),
    };
    format!(
        "Fix this Python code to pass the tests.\n\
         {contract}\n\
         Current Code:\n{current_code}\n\n\
         Test Results:\n{results}\n\
         Requirements:\n{rules}\n\n\
         Return ONLY the fixed Python code between the {OPEN_MARKER} tags."
    )
}

/// Prompt asking for the executable test-command list as a JSON array.
pub fn synthesize_commands(original_code: &str, test_cases: &str, module_name: &str) -> String {
    format!(
        "Generate test commands for the following code and test cases.\n\
         Each test command should include:\n\
         1. The exact command to run the test\n\
         2. The expected result\n\n\
         IMPORTANT: Your response must be a valid JSON array of objects. Each object must have exactly two fields:\n\
         - \"command\": string containing the command to run\n\
         - \"expected_result\": string containing the expected output\n\n\
         IMPORTANT: Use '{module_name}' as the module name in the import statements.\n\n\
         Example format:\n\
         [\n  \
           {{\n    \
             \"command\": \"python -c 'from {module_name} import multiply_a_b; print(multiply_a_b(2, 3))'\",\n    \
             \"expected_result\": \"6\"\n  \
           }},\n  \
           {{\n    \
             \"command\": \"python -c 'from {module_name} import multiply_a_b; print(multiply_a_b(0, 5))'\",\n    \
             \"expected_result\": \"0\"\n  \
           }}\n\
         ]\n\n\
         Original Code:\n{original_code}\n\n\
         Test Cases:\n{test_cases}\n\n\
         Return ONLY the JSON array, no other text or explanation."
    )
}

/// Plain-text rendering of a report for the repair prompt. Always ends with
/// a newline.
pub fn render_report(report: &TestReport) -> String {
    let mut out = format!("all_passed: {}\n", report.all_passed);
    for result in &report.test_results {
        out.push_str(&format!(
            "test {} [{}]: command: {}\n  expected: {:?}, actual: {:?}, exit code: {}\n",
            result.test_number,
            if result.passed { "PASS" } else { "FAIL" },
            result.command,
            result.expected,
            result.actual,
            result.return_code,
        ));
        if !result.error_output.is_empty() {
            out.push_str(&format!("  stderr: {}\n", result.error_output));
        }
    }
    for error in &report.errors {
        out.push_str(&format!("batch error: {error}\n"));
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
