//! HTTP route handlers
//!
//! - `/`, `/health` - health check
//! - `/socket` - push channel (WebSocket)
//! - `/users/*` - signup, login, logout, leaderboard
//! - `/tasks/*` - task CRUD and completion
//! - `/points` - the caller's points ledger

pub mod health;
pub mod points;
pub mod response;
pub mod socket;
pub mod tasks;
pub mod users;

pub use health::health_check;
pub use response::{error_response, BoxBody};

use hyper::Method;

/// A resolved route. Task ids are passed through raw; handlers parse them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Health,
    Socket,
    Signup,
    Login,
    Logout,
    Leaderboard,
    CreateTask,
    ListTasks,
    GetTask(&'a str),
    UpdateTask(&'a str),
    DeleteTask(&'a str),
    TaskProgress(&'a str),
    CompleteTask(&'a str),
    TaskDeadline(&'a str),
    Points,
}

impl<'a> Route<'a> {
    /// Match a method and path segments against the route table
    pub fn resolve(method: &Method, segments: &[&'a str]) -> Option<Self> {
        let route = match (method, segments) {
            (&Method::GET, []) | (&Method::GET, ["health"]) => Self::Health,
            (&Method::GET, ["socket"]) => Self::Socket,

            (&Method::POST, ["users", "signup"]) => Self::Signup,
            (&Method::POST, ["users", "login"]) => Self::Login,
            (&Method::POST, ["users", "logout"]) => Self::Logout,
            (&Method::GET, ["users"]) => Self::Leaderboard,

            (&Method::POST, ["tasks"]) => Self::CreateTask,
            (&Method::GET, ["tasks"]) => Self::ListTasks,
            (&Method::GET, ["tasks", id]) => Self::GetTask(*id),
            (&Method::PATCH, ["tasks", id]) | (&Method::PUT, ["tasks", id]) => Self::UpdateTask(*id),
            (&Method::DELETE, ["tasks", id]) => Self::DeleteTask(*id),
            (&Method::PATCH, ["tasks", id, "progress"]) => Self::TaskProgress(*id),
            (&Method::PATCH, ["tasks", id, "complete"]) => Self::CompleteTask(*id),
            (&Method::PATCH, ["tasks", id, "deadline"]) => Self::TaskDeadline(*id),

            (&Method::GET, ["points"]) => Self::Points,
            _ => return None,
        };
        Some(route)
    }

    /// Routes reachable without an access token
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            Self::Health | Self::Socket | Self::Signup | Self::Login
        )
    }
}

/// Split a path into its non-empty segments
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(method: Method, path: &str) -> Option<Route<'_>> {
        Route::resolve(&method, &path_segments(path))
    }

    #[test]
    fn test_route_table() {
        assert_eq!(resolve(Method::GET, "/"), Some(Route::Health));
        assert_eq!(resolve(Method::GET, "/health/"), Some(Route::Health));
        assert_eq!(resolve(Method::POST, "/users/signup"), Some(Route::Signup));
        assert_eq!(resolve(Method::GET, "/users"), Some(Route::Leaderboard));
        assert_eq!(
            resolve(Method::PATCH, "/tasks/abc/complete"),
            Some(Route::CompleteTask("abc"))
        );
        assert_eq!(resolve(Method::PUT, "/tasks/abc"), Some(Route::UpdateTask("abc")));
        assert_eq!(resolve(Method::DELETE, "/tasks"), None);
        assert_eq!(resolve(Method::GET, "/tasks/abc/complete"), None);
    }

    #[test]
    fn test_public_routes() {
        assert!(Route::Signup.is_public());
        assert!(Route::Socket.is_public());
        assert!(!Route::Points.is_public());
        assert!(!Route::CompleteTask("x").is_public());
    }
}
