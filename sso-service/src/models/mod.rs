pub mod app;
pub mod permission;
pub mod refresh_token;
pub mod reset_token;
pub mod user;
pub mod verification_token;

pub use app::App;
pub use permission::{Permission, ADMIN, STAFF};
pub use refresh_token::RefreshToken;
pub use reset_token::ResetToken;
pub use user::{NewUser, User, UserProfile};
pub use verification_token::VerificationToken;
