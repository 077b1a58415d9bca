use serde::Serialize;
use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};
use tinytemplate::{format_unescaped, TinyTemplate};

pub const SUBJECT_TEMPLATE_NAME: &str = "subject.txt";
pub const EMAIL_TEMPLATE_NAME: &str = "email.txt";

const SUBJECT_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/subject.txt"
));
const EMAIL_TEMPLATE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/assets/email.txt"));

/// Resolves a template name to its source text.
pub trait TemplateSource: Send + Sync {
    fn load(&self, name: &str) -> Result<Cow<'_, str>, TemplateError>;
}

/// The templates shipped with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTemplates;

impl TemplateSource for BuiltinTemplates {
    fn load(&self, name: &str) -> Result<Cow<'_, str>, TemplateError> {
        match name {
            SUBJECT_TEMPLATE_NAME => Ok(SUBJECT_TEMPLATE.into()),
            EMAIL_TEMPLATE_NAME => Ok(EMAIL_TEMPLATE.into()),
            _ => Err(TemplateError::NotFound(name.into())),
        }
    }
}

/// Templates read from a directory supplied by the deployment.
#[derive(Debug, Clone)]
pub struct DirectoryTemplates {
    dir: PathBuf,
}

impl DirectoryTemplates {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl TemplateSource for DirectoryTemplates {
    fn load(&self, name: &str) -> Result<Cow<'_, str>, TemplateError> {
        match std::fs::read_to_string(self.dir.join(name)) {
            Ok(content) => Ok(content.into()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(TemplateError::NotFound(name.into()))
            }
            Err(error) => Err(TemplateError::Read {
                name: name.into(),
                error,
            }),
        }
    }
}

/// Renders a plain text template. Values are not HTML-escaped.
pub fn render_text<C: Serialize>(
    source: &dyn TemplateSource,
    name: &str,
    context: &C,
) -> Result<String, TemplateError> {
    let text = source.load(name)?;
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);
    tt.add_template(name, &text)
        .map_err(|error| TemplateError::Render {
            name: name.into(),
            error,
        })?;
    tt.render(name, context)
        .map_err(|error| TemplateError::Render {
            name: name.into(),
            error,
        })
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template {0} not found")]
    NotFound(String),
    #[error("Could not read template {name}: {error}")]
    Read {
        name: String,
        #[source]
        error: std::io::Error,
    },
    #[error("Could not render template {name}: {error}")]
    Render {
        name: String,
        #[source]
        error: tinytemplate::error::Error,
    },
}
