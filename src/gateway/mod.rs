mod auth;
mod handler;
mod types;

pub use auth::admin_auth_middleware;
pub use handler::{
    AppState, handle_bulk, handle_email, handle_health, handle_index, handle_not_found,
    handle_refresh, handle_reset, handle_stats,
};
pub use types::WebAppStat;
