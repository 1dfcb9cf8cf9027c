//! Emitter that keeps the response instead of writing it.

use std::sync::Mutex;

use crate::emitter::{EmitError, Emitter};
use crate::http::response::Response;

#[derive(Debug, Default)]
pub struct FakeEmitter {
    last: Mutex<Option<Response>>,
}

impl FakeEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently emitted response.
    pub fn last_response(&self) -> Option<Response> {
        self.last.lock().expect("fake emitter mutex poisoned").clone()
    }

    pub fn take(&self) -> Option<Response> {
        self.last.lock().expect("fake emitter mutex poisoned").take()
    }
}

impl Emitter for FakeEmitter {
    fn emit(&self, response: Response) -> Result<(), EmitError> {
        *self.last.lock().expect("fake emitter mutex poisoned") = Some(response);
        Ok(())
    }
}
