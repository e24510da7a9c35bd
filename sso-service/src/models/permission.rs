use sqlx::FromRow;

pub const ADMIN: &str = "admin";
pub const STAFF: &str = "staff";

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Permission {
    pub id: i64,
    pub code: String,
}
