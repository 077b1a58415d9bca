use crate::form::RawSubmission;

pub const HONEYPOT_FIELD: &str = "accept_terms";

/// Hidden trap field which people never see and bots tend to fill in.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoneyPot;

impl HoneyPot {
    pub fn verify(&self, submission: &RawSubmission) -> bool {
        submission
            .accept_terms
            .as_deref()
            .map_or(true, str::is_empty)
    }

    pub fn widget_html(&self) -> String {
        format!(
            r#"<p style="display:none" aria-hidden="true"><label for="id_{HONEYPOT_FIELD}">Leave this field empty</label><input type="text" name="{HONEYPOT_FIELD}" id="id_{HONEYPOT_FIELD}" value="" tabindex="-1" autocomplete="off"></p>"#
        )
    }
}
