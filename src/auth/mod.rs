use crate::state::AppState;
use axum::Router;

pub mod claims;
mod dto;
pub mod google;
pub mod handlers;
pub mod middleware;
mod password;
pub mod repo;
pub mod repo_types;
mod services;
pub mod tokens;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::profile_routes(state))
}
