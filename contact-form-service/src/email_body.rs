use crate::submission::Submission;
use serde::Serialize;
use serde_json::Value;
use tinytemplate::{error::Error, format, TinyTemplate};

const CONTACT_EMAIL_TEMPLATE_NAME: &str = "contact-email";
const CONTACT_EMAIL_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact-email.html"
));

#[derive(Serialize)]
struct Context<'a> {
    name: &'a str,
    email: &'a str,
    phone: &'a str,
    area: &'a str,
    message: &'a str,
    submitted_at: &'a str,
}

/// Renders the HTML body of the email sent for `submission`. Every field is HTML-escaped.
pub fn render_email_body(submission: &Submission, submitted_at: &str) -> Result<String, Error> {
    let mut tt = TinyTemplate::new();
    tt.add_formatter("render_lines", render_lines);
    tt.add_template(CONTACT_EMAIL_TEMPLATE_NAME, CONTACT_EMAIL_TEMPLATE)?;
    let context = Context {
        name: submission.name,
        email: submission.email,
        phone: submission.phone,
        area: submission.area_of_interest.label(),
        message: submission.message,
        submitted_at,
    };
    tt.render(CONTACT_EMAIL_TEMPLATE_NAME, &context)
}

fn render_lines(value: &Value, output: &mut String) -> Result<(), Error> {
    let mut formatted = String::new();
    format(value, &mut formatted)?;
    output.push_str(&formatted.replace("\r\n", "\n").replace('\n', "<br>"));
    Ok(())
}
