use serde::{Deserialize, Serialize};

/// Which inference gateway a session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Model runtime with a lifecycle, fed a bounded conversation window
    #[default]
    Embedded,
    /// Plain `/api/generate` call with the latest message only
    Http,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Embedded => "embedded",
            Backend::Http => "http",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "embedded" | "local" => Some(Backend::Embedded),
            "http" | "generate" => Some(Backend::Http),
            _ => None,
        }
    }

    pub fn all() -> Vec<Backend> {
        vec![Backend::Embedded, Backend::Http]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Backend::Embedded => "Model runtime (with memory)",
            Backend::Http => "HTTP generate (single prompt)",
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Backend::parse(s).ok_or_else(|| {
            let names: Vec<&str> = Backend::all().iter().map(|b| b.as_str()).collect();
            format!("unknown backend '{}', expected one of: {}", s, names.join(", "))
        })
    }
}
