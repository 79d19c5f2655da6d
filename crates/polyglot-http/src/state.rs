use std::sync::Arc;

use polyglot_router::Router;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
}
