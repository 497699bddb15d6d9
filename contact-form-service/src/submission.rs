use lettre::{message::Mailbox, Address};
use regex::Regex;
use serde::Deserialize;
use std::{fmt::Display, str::FromStr, sync::OnceLock};

/// Basic address shape: something, `@`, something containing a dot, no whitespace.
const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Whether `email` is an address that can be stored and placed in a message header. Shared by
/// the submission validator and the settings store.
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX
        .get_or_init(|| Regex::new(EMAIL_PATTERN).expect("email pattern is a valid regex"))
        .is_match(email)
        && email.parse::<Address>().is_ok()
        && email.parse::<Mailbox>().is_ok()
}

/// Contact form payload as posted by the site, JSON or form-encoded.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContactFormSubmission {
    #[serde(alias = "nome")]
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "telefone")]
    pub phone: Option<String>,
    #[serde(alias = "area")]
    pub area_of_interest: Option<String>,
    #[serde(alias = "mensagem")]
    pub message: Option<String>,
    #[serde(alias = "recaptchaToken", alias = "g-recaptcha-response")]
    pub anti_abuse_token: Option<String>,
}

impl ContactFormSubmission {
    pub fn validate(&self) -> Result<Submission<'_>, ValidationError> {
        let name = required("name", &self.name)?;
        let email = required("email", &self.email)?;
        let phone = required("phone", &self.phone)?;
        let area_of_interest = required("areaOfInterest", &self.area_of_interest)?;
        let message = required("message", &self.message)?;

        if !is_valid_email(email) {
            return Err(ValidationError::InvalidField("email"));
        }
        let area_of_interest = area_of_interest.parse()?;

        Ok(Submission {
            name,
            email,
            phone,
            area_of_interest,
            message,
            anti_abuse_token: self
                .anti_abuse_token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty()),
        })
    }
}

fn required<'a>(
    field: &'static str,
    value: &'a Option<String>,
) -> Result<&'a str, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ValidationError::MissingField(field)),
    }
}

/// A submission whose business fields are present and well-formed. Borrows from the payload.
#[derive(Debug)]
pub struct Submission<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub phone: &'a str,
    pub area_of_interest: AreaOfInterest,
    pub message: &'a str,
    pub anti_abuse_token: Option<&'a str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AreaOfInterest {
    Civil,
    Labor,
    Corporate,
    SocialSecurity,
    Consumer,
    RealEstate,
}

impl AreaOfInterest {
    pub fn label(self) -> &'static str {
        match self {
            AreaOfInterest::Civil => "Direito Civil",
            AreaOfInterest::Labor => "Direito Trabalhista",
            AreaOfInterest::Corporate => "Direito Empresarial",
            AreaOfInterest::SocialSecurity => "Direito Previdenciário",
            AreaOfInterest::Consumer => "Direito do Consumidor",
            AreaOfInterest::RealEstate => "Direito Imobiliário",
        }
    }
}

impl FromStr for AreaOfInterest {
    type Err = ValidationError;

    /// Accepts the API names as well as the option values of the site's select box.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "civil" => Ok(AreaOfInterest::Civil),
            "labor" | "trabalhista" => Ok(AreaOfInterest::Labor),
            "corporate" | "empresarial" => Ok(AreaOfInterest::Corporate),
            "socialSecurity" | "previdenciario" => Ok(AreaOfInterest::SocialSecurity),
            "consumer" | "consumidor" => Ok(AreaOfInterest::Consumer),
            "realEstate" | "imobiliario" => Ok(AreaOfInterest::RealEstate),
            _ => Err(ValidationError::InvalidField("areaOfInterest")),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ValidationError {
    MissingField(&'static str),
    InvalidField(&'static str),
    MalformedBody(String),
}

impl ValidationError {
    /// Message shown to the visitor.
    pub fn client_message(&self) -> String {
        match self {
            ValidationError::MissingField(field) => {
                format!("Todos os campos são obrigatórios. Campo ausente: {field}.")
            }
            ValidationError::InvalidField("email") => "Email inválido.".into(),
            ValidationError::InvalidField("areaOfInterest") => {
                "Área de interesse inválida.".into()
            }
            ValidationError::InvalidField(field) => format!("Campo inválido: {field}."),
            ValidationError::MalformedBody(_) => "Formulário inválido.".into(),
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "Missing field {field}"),
            ValidationError::InvalidField(field) => write!(f, "Invalid field {field}"),
            ValidationError::MalformedBody(description) => {
                write!(f, "Malformed request body: {description}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}
