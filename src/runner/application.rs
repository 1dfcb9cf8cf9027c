//! The application: a middleware pipeline plus lifecycle events.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::http::request::ServerRequest;
use crate::http::response::Response;
use crate::runner::events::{Event, EventDispatcher};
use crate::runner::handler::{HandlerError, MiddlewarePipeline, RequestHandler};

pub struct Application {
    pipeline: MiddlewarePipeline,
    fallback: Arc<dyn RequestHandler>,
    events: Arc<dyn EventDispatcher>,
}

impl Application {
    pub fn new(
        pipeline: MiddlewarePipeline,
        fallback: Arc<dyn RequestHandler>,
        events: Arc<dyn EventDispatcher>,
    ) -> Self {
        Self {
            pipeline,
            fallback,
            events,
        }
    }

    pub fn events(&self) -> &Arc<dyn EventDispatcher> {
        &self.events
    }

    pub fn start(&self) {
        self.events.dispatch(&Event::ApplicationStartup);
    }

    /// Dispatch `request` through the pipeline.
    ///
    /// `AfterRequest` fires whether dispatch succeeded, failed or panicked.
    pub fn handle(&self, request: ServerRequest) -> Result<Response, HandlerError> {
        self.events.dispatch(&Event::BeforeRequest(request.clone()));

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.pipeline.dispatch(request, self.fallback.as_ref())
        }))
        .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))));

        self.events
            .dispatch(&Event::AfterRequest(result.as_ref().ok().cloned()));
        result
    }

    pub fn after_emit(&self, response: Option<&Response>) {
        self.events.dispatch(&Event::AfterEmit(response.cloned()));
    }

    pub fn shutdown(&self) {
        self.events.dispatch(&Event::ApplicationShutdown);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::http::request::{ServerParams, Uri};
    use crate::runner::events::ListenerDispatcher;

    fn application(handler: Arc<dyn RequestHandler>) -> (Application, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let events: Arc<dyn EventDispatcher> = Arc::new(
            ListenerDispatcher::new().listen_all(move |e| {
                sink.lock().unwrap().push(format!("{}:{:?}", e.name(), e.status()))
            }),
        );
        let pipeline = MiddlewarePipeline::new(Arc::clone(&events));
        (Application::new(pipeline, handler, events), seen)
    }

    fn request() -> ServerRequest {
        ServerRequest::new("GET", Uri::new(), ServerParams::new())
    }

    fn ok(_: ServerRequest) -> Result<Response, HandlerError> {
        Ok(Response::ok())
    }

    #[test]
    fn handle_fires_request_events() {
        let (app, seen) = application(Arc::new(ok));
        assert_eq!(app.handle(request()).unwrap().status(), 200);
        assert_eq!(
            *seen.lock().unwrap(),
            ["before_request:None", "after_request:Some(200)"]
        );
    }

    #[test]
    fn panics_become_errors_and_after_request_still_fires() {
        let (app, seen) = application(Arc::new(|_: ServerRequest| -> Result<Response, HandlerError> {
            panic!("handler exploded")
        }));

        let err = app.handle(request()).unwrap_err();
        assert!(matches!(err, HandlerError::Panicked(ref m) if m == "handler exploded"));
        assert_eq!(
            *seen.lock().unwrap(),
            ["before_request:None", "after_request:None"]
        );
    }

    #[test]
    fn lifecycle_events() {
        let (app, seen) = application(Arc::new(ok));
        app.start();
        app.after_emit(None);
        app.shutdown();
        assert_eq!(
            *seen.lock().unwrap(),
            [
                "application_startup:None",
                "after_emit:None",
                "application_shutdown:None"
            ]
        );
    }
}
