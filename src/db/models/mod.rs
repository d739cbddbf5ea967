use serde::Deserialize;

use crate::ranking::page::PageRequest;
use crate::ranking::window::Window;

pub mod claim;
pub mod user;

/// Raw `?page=&limit=` query parameters.
///
/// Kept as strings so malformed values fall back to defaults instead of rejecting the request.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl Pagination {
    pub fn request(&self) -> PageRequest {
        PageRequest::from_query(self.page.as_deref(), self.limit.as_deref())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LeaderboardQuery {
    pub window: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl LeaderboardQuery {
    pub fn window(&self) -> Window {
        Window::from_query(self.window.as_deref())
    }

    pub fn request(&self) -> PageRequest {
        PageRequest::from_query(self.page.as_deref(), self.limit.as_deref())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsQuery {
    pub window: Option<String>,
    pub user_id: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl ClaimsQuery {
    pub fn window(&self) -> Window {
        Window::from_query(self.window.as_deref())
    }

    pub fn request(&self) -> PageRequest {
        PageRequest::from_query(self.page.as_deref(), self.limit.as_deref())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct CreateUserBody {
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BulkCreateBody {
    #[serde(default)]
    pub names: Vec<String>,
}
