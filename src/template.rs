use crate::{config::FORWARD_PLACEHOLDER, error::TemplateError};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Replaces every `{{fwd}}` placeholder in `args` with `address`.
///
/// Whitespace inside the braces is ignored. Any other placeholder name, an
/// empty placeholder or an unterminated `{{` is an error. A lone `}}` is kept
/// as literal text.
pub fn substitute(args: &[String], address: &str) -> Result<Vec<String>, TemplateError> {
    args.iter()
        .map(|argument| substitute_one(argument, address))
        .collect()
}

fn substitute_one(argument: &str, address: &str) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(argument.len());
    let mut rest = argument;
    while let Some(start) = rest.find(OPEN) {
        output.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            return Err(TemplateError::Unterminated {
                argument: argument.to_string(),
            });
        };
        match after_open[..end].trim() {
            "" => {
                return Err(TemplateError::Empty {
                    argument: argument.to_string(),
                });
            }
            FORWARD_PLACEHOLDER => output.push_str(address),
            name => {
                return Err(TemplateError::Unknown {
                    name: name.to_string(),
                    argument: argument.to_string(),
                });
            }
        }
        rest = &after_open[end + CLOSE.len()..];
    }
    output.push_str(rest);
    Ok(output)
}
