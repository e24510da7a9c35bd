use secrecy::SecretString;
use sqlx::FromRow;

/// A tenant application. Its secret signs and verifies every token issued for it.
#[derive(Debug, Clone)]
pub struct App {
    pub id: i32,
    pub name: String,
    pub secret: SecretString,
}

impl App {
    pub fn new(id: i32, name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            secret: SecretString::new(secret.into()),
        }
    }
}

#[derive(FromRow)]
pub(crate) struct AppRow {
    pub id: i32,
    pub name: String,
    pub secret: String,
}

impl From<AppRow> for App {
    fn from(row: AppRow) -> Self {
        App::new(row.id, row.name, row.secret)
    }
}
