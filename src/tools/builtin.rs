//! Built-in capabilities: arithmetic, comparison and letter counting.

use serde::Deserialize;
use serde_json::{json, Number, Value};

use super::function_table::FunctionTable;
use crate::capabilities::{Capability, LlmDescription};
use crate::utilities::errors::BoxError;

#[derive(Debug, Deserialize)]
struct BinaryArgs {
    a: Number,
    b: Number,
}

#[derive(Debug, Deserialize)]
struct CountLetterArgs {
    text: String,
    letter: String,
}

fn as_f64(n: &Number) -> Result<f64, BoxError> {
    n.as_f64().ok_or_else(|| format!("{} is not representable as f64", n).into())
}

fn float(value: f64) -> Result<Value, BoxError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| "result is not a finite number".into())
}

/// Integer arithmetic when both operands are integers and the result fits,
/// floating point otherwise.
fn arithmetic(
    args: BinaryArgs,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, BoxError> {
    if let (Some(a), Some(b)) = (args.a.as_i64(), args.b.as_i64()) {
        if let Some(result) = int_op(a, b) {
            return Ok(Value::from(result));
        }
    }
    float(float_op(as_f64(&args.a)?, as_f64(&args.b)?))
}

fn add(args: BinaryArgs) -> Result<Value, BoxError> {
    arithmetic(args, i64::checked_add, |a, b| a + b)
}

fn mul(args: BinaryArgs) -> Result<Value, BoxError> {
    arithmetic(args, i64::checked_mul, |a, b| a * b)
}

fn compare(args: BinaryArgs) -> Result<String, BoxError> {
    let (a, b) = (as_f64(&args.a)?, as_f64(&args.b)?);
    let sentence = if a > b {
        format!("{} is greater than {}", args.a, args.b)
    } else if a < b {
        format!("{} is greater than {}", args.b, args.a)
    } else {
        format!("{} is equal to {}", args.a, args.b)
    };
    Ok(sentence)
}

fn count_letter(args: CountLetterArgs) -> Result<String, BoxError> {
    let text = args.text.to_lowercase();
    let letter = args.letter.to_lowercase();
    if letter.is_empty() {
        return Err("letter must not be empty".into());
    }
    let count = text.matches(letter.as_str()).count();
    Ok(format!(
        "The letter '{}' appears {} times in the string.",
        letter, count
    ))
}

fn binary_schema(number_type: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "a": {"type": number_type, "description": "A number"},
            "b": {"type": number_type, "description": "A number"}
        },
        "required": ["a", "b"]
    })
}

/// Function table holding every built-in callable.
pub fn builtin_function_table() -> FunctionTable {
    let table = FunctionTable::new();
    register_builtins(&table);
    table
}

/// Add the built-in callables to an existing table.
pub fn register_builtins(table: &FunctionTable) {
    table.register_typed("add", add);
    table.register_typed("mul", mul);
    table.register_typed("compare", compare);
    table.register_typed("count_letter", count_letter);
}

/// Capability definitions matching [`builtin_function_table`].
pub fn builtin_capabilities() -> Vec<Capability> {
    vec![
        Capability::function_call(
            "add",
            "Compute the sum of two numbers",
            LlmDescription::new("add", "Compute the sum of two numbers", binary_schema("integer")),
        )
        .with_original_body(json!("add(a, b) -> a + b")),
        Capability::function_call(
            "mul",
            "Calculate the product of two numbers",
            LlmDescription::new(
                "mul",
                "Calculate the product of two numbers",
                binary_schema("integer"),
            ),
        )
        .with_original_body(json!("mul(a, b) -> a * b")),
        Capability::function_call(
            "compare",
            "Compare two numbers, which one is bigger",
            LlmDescription::new(
                "compare",
                "Compare two number, which one is bigger",
                binary_schema("number"),
            ),
        )
        .with_original_body(json!("compare(a, b) -> sentence naming the larger number")),
        Capability::function_call(
            "count_letter",
            "Count the number of times a letter appears in a text",
            LlmDescription::new(
                "count_letter",
                "Count the number of times a letter appears in a text",
                json!({
                    "type": "object",
                    "properties": {
                        "text": {"type": "string", "description": "The text to search in"},
                        "letter": {"type": "string", "description": "The letter to count"}
                    },
                    "required": ["text", "letter"]
                }),
            ),
        )
        .with_original_body(json!("count_letter(text, letter) -> case-insensitive count")),
    ]
}
