//! Points route

use hyper::{Response, StatusCode};
use serde::Serialize;

use super::response::{success, BoxBody};
use crate::auth::AuthUser;
use crate::db::schemas::LedgerView;
use crate::server::AppState;
use crate::types::Result;

#[derive(Serialize, Debug)]
pub struct PointsBody {
    pub ledger: LedgerView,
    /// The ledger was initialized by this request
    pub created: bool,
}

/// GET /points
pub async fn get(state: &AppState, caller: &AuthUser) -> Result<Response<BoxBody>> {
    let lookup = state.ledger.get_or_create(&caller.user_id).await?;
    let body = PointsBody {
        ledger: LedgerView::from(lookup.ledger()),
        created: lookup.was_created(),
    };
    Ok(success(StatusCode::OK, body, "Pomodoro points retrieved successfully"))
}
