use serde::Serialize;
use serde_json::Value;
use tinytemplate::{error::Error, format, TinyTemplate};

const SEND_ERROR_TEMPLATE_NAME: &str = "send-error-template";
const SEND_ERROR_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/send-error.html"
));

#[derive(Serialize)]
struct Context<'a> {
    subject: &'a str,
    body: &'a str,
}

/// Page shown when an accepted message could not be sent. It echoes the
/// message back so the visitor can keep a copy.
pub fn render_error_page(subject: &str, body: &str) -> String {
    let mut tt = TinyTemplate::new();
    tt.add_formatter("render_paragraphs", render_paragraphs);
    tt.add_template(SEND_ERROR_TEMPLATE_NAME, SEND_ERROR_TEMPLATE)
        .unwrap();
    tt.render(SEND_ERROR_TEMPLATE_NAME, &Context { subject, body })
        .unwrap()
}

fn render_paragraphs(value: &Value, output: &mut String) -> Result<(), Error> {
    output.push_str("<p>");
    let mut formatted = String::new();
    format(value, &mut formatted)?;
    output.push_str(&formatted.replace("\n\n", "</p><p>"));
    output.push_str("</p>");
    Ok(())
}
