use crate::handler::RequestHandler;

#[derive(Clone)]
pub struct AppState {
    pub handler: RequestHandler,
}

impl AppState {
    pub fn new(handler: RequestHandler) -> Self {
        Self { handler }
    }
}
