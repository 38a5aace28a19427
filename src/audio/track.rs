use std::fmt;

/// Pista lista para encolar: título legible y locator que entiende el resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    title: String,
    locator: String,
}

impl TrackDescriptor {
    pub fn new(title: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            locator: locator.into(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }
}

impl fmt::Display for TrackDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.title, self.locator)
    }
}
