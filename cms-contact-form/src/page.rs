use crate::controller::Rendering;
use tinytemplate::{error::Error, TinyTemplate};

const CONTACT_TEMPLATE_NAME: &str = "contact";
const CONTACT_TEMPLATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/contact.html"));

/// Renders the contact form section of a page.
///
/// Visitor input is HTML-escaped. The spam protection widget, which the guard
/// produces itself, and the thanks text, which site editors write as HTML, are
/// inserted verbatim.
pub fn render_page(rendering: &Rendering) -> Result<String, Error> {
    let mut tt = TinyTemplate::new();
    tt.add_template(CONTACT_TEMPLATE_NAME, CONTACT_TEMPLATE)?;
    tt.render(CONTACT_TEMPLATE_NAME, rendering)
}
