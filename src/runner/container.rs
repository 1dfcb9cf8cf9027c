//! Service container.
//!
//! # Responsibilities
//! - Hold the services a run needs, keyed by type (trait objects included)
//! - Resolve factory definitions lazily, once, detecting cycles
//! - Build the container for a run (`ContainerFactory`) and bootstrap it
//!
//! # Data Flow
//! ```text
//! RunnerConfig
//!     → ContainerFactory::create (definitions)
//!     → ContainerFactory::bootstrap (side effects against the container)
//!     → Container::get::<T>() (lazy, cached)
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::config::RunnerConfig;
use crate::http::factory::RequestFactory;
use crate::http::host::HostInput;
use crate::http::stream::{DefaultStreamFactory, StreamFactory};
use crate::runner::application::Application;
use crate::runner::error_handler::{ErrorHandler, PanicHookErrorHandler};
use crate::runner::events::{EventDispatcher, ListenerDispatcher};
use crate::runner::handler::{
    ErrorCatcher, Middleware, MiddlewarePipeline, PlainTextErrorCatcher, RequestHandler,
};

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("No definition or class found for \"{0}\".")]
    NotFound(String),

    #[error("Circular reference detected: {0}.")]
    CircularReference(String),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),
}

type Instance = Box<dyn Any + Send + Sync>;
type Factory = Arc<dyn Fn(&Container) -> Result<Instance, ContainerError> + Send + Sync>;

/// Side effect run against a freshly built container.
pub type BootstrapFn = Arc<dyn Fn(&Container) -> Result<(), ContainerError> + Send + Sync>;

struct Definition {
    name: &'static str,
    factory: Factory,
}

pub struct Container {
    definitions: HashMap<TypeId, Definition>,
    resolved: Mutex<HashMap<TypeId, Instance>>,
    resolving: Mutex<Vec<(TypeId, &'static str)>>,
}

impl Container {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    pub fn has<T: ?Sized + 'static>(&self) -> bool {
        self.definitions.contains_key(&TypeId::of::<Arc<T>>())
    }

    /// Resolve a service. Factory results are cached.
    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, ContainerError> {
        let id = TypeId::of::<Arc<T>>();

        let cached = self
            .resolved
            .lock()
            .expect("container mutex poisoned")
            .get(&id)
            .and_then(|instance| instance.downcast_ref::<Arc<T>>())
            .cloned();
        if let Some(service) = cached {
            return Ok(service);
        }

        let definition = self
            .definitions
            .get(&id)
            .ok_or_else(|| ContainerError::NotFound(type_name::<T>().to_string()))?;

        {
            let mut stack = self.resolving.lock().expect("container mutex poisoned");
            if stack.iter().any(|(pending, _)| *pending == id) {
                let mut chain: Vec<&str> = stack.iter().map(|(_, name)| *name).collect();
                chain.push(definition.name);
                return Err(ContainerError::CircularReference(chain.join(" -> ")));
            }
            stack.push((id, definition.name));
        }

        let produced = (definition.factory)(self);
        self.resolving.lock().expect("container mutex poisoned").pop();

        let instance = produced?;
        let service = instance.downcast_ref::<Arc<T>>().cloned().ok_or_else(|| {
            ContainerError::InvalidDefinition(format!(
                "definition for \"{}\" produced a value of another type",
                definition.name
            ))
        })?;

        self.resolved
            .lock()
            .expect("container mutex poisoned")
            .insert(id, instance);
        Ok(service)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.definitions.values().map(|d| d.name).collect();
        names.sort_unstable();
        f.debug_struct("Container").field("definitions", &names).finish()
    }
}

#[derive(Default)]
pub struct ContainerBuilder {
    definitions: HashMap<TypeId, Definition>,
}

impl ContainerBuilder {
    /// Register a ready instance.
    pub fn instance<T: ?Sized + Send + Sync + 'static>(self, service: Arc<T>) -> Self {
        self.factory::<T, _>(move |_| Ok(Arc::clone(&service)))
    }

    /// Register a lazily resolved definition. Replaces an earlier one for `T`.
    pub fn factory<T, F>(mut self, factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Container) -> Result<Arc<T>, ContainerError> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |c: &Container| factory(c).map(|s| Box::new(s) as Instance));
        self.definitions.insert(
            TypeId::of::<Arc<T>>(),
            Definition {
                name: type_name::<T>(),
                factory,
            },
        );
        self
    }

    pub fn build(self) -> Container {
        Container {
            definitions: self.definitions,
            resolved: Mutex::new(HashMap::new()),
            resolving: Mutex::new(Vec::new()),
        }
    }
}

/// Builds the container of one run.
pub trait ContainerFactory: Send + Sync {
    fn create(&self, config: &RunnerConfig) -> Result<Container, ContainerError>;

    /// Run bootstrap steps against the container. Errors are fatal to the run.
    fn bootstrap(&self, _container: &Container) -> Result<(), ContainerError> {
        Ok(())
    }
}

/// Container factory assembled in code.
///
/// Registers `RunnerConfig`, `dyn StreamFactory`, `RequestFactory`,
/// `dyn EventDispatcher`, `dyn ErrorHandler`, `dyn ErrorCatcher` and
/// `Application`.
#[derive(Clone)]
pub struct StaticContainerFactory {
    fallback: Arc<dyn RequestHandler>,
    middlewares: Vec<Arc<dyn Middleware>>,
    events: Arc<dyn EventDispatcher>,
    streams: Arc<dyn StreamFactory>,
    host_input: Option<Arc<dyn HostInput>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    error_catcher: Option<Arc<dyn ErrorCatcher>>,
    bootstrap: Vec<BootstrapFn>,
}

impl StaticContainerFactory {
    pub fn new(fallback: Arc<dyn RequestHandler>) -> Self {
        Self {
            fallback,
            middlewares: Vec::new(),
            events: Arc::new(ListenerDispatcher::new()),
            streams: Arc::new(DefaultStreamFactory),
            host_input: None,
            error_handler: None,
            error_catcher: None,
            bootstrap: Vec::new(),
        }
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventDispatcher>) -> Self {
        self.events = events;
        self
    }

    pub fn with_stream_factory(mut self, streams: Arc<dyn StreamFactory>) -> Self {
        self.streams = streams;
        self
    }

    pub fn with_host_input(mut self, input: Arc<dyn HostInput>) -> Self {
        self.host_input = Some(input);
        self
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn with_error_catcher(mut self, catcher: Arc<dyn ErrorCatcher>) -> Self {
        self.error_catcher = Some(catcher);
        self
    }

    pub fn with_bootstrap<F>(mut self, step: F) -> Self
    where
        F: Fn(&Container) -> Result<(), ContainerError> + Send + Sync + 'static,
    {
        self.bootstrap.push(Arc::new(step));
        self
    }
}

impl ContainerFactory for StaticContainerFactory {
    fn create(&self, config: &RunnerConfig) -> Result<Container, ContainerError> {
        let error_handler = self
            .error_handler
            .clone()
            .unwrap_or_else(|| Arc::new(PanicHookErrorHandler::default()));
        let error_catcher = self
            .error_catcher
            .clone()
            .unwrap_or_else(|| Arc::new(PlainTextErrorCatcher::new(config.debug)));

        let host_input = self.host_input.clone();
        let fallback = Arc::clone(&self.fallback);
        let middlewares = self.middlewares.clone();

        Ok(Container::builder()
            .instance::<RunnerConfig>(Arc::new(config.clone()))
            .instance::<dyn StreamFactory>(Arc::clone(&self.streams))
            .instance::<dyn EventDispatcher>(Arc::clone(&self.events))
            .instance::<dyn ErrorHandler>(error_handler)
            .instance::<dyn ErrorCatcher>(error_catcher)
            .factory::<RequestFactory, _>(move |c| {
                let factory = RequestFactory::new(c.get::<dyn StreamFactory>()?);
                Ok(Arc::new(match &host_input {
                    Some(input) => factory.with_host_input(Arc::clone(input)),
                    None => factory,
                }))
            })
            .factory::<Application, _>(move |c| {
                let events = c.get::<dyn EventDispatcher>()?;
                let pipeline = middlewares
                    .iter()
                    .fold(MiddlewarePipeline::new(Arc::clone(&events)), |p, m| {
                        p.with_middleware(Arc::clone(m))
                    });
                Ok(Arc::new(Application::new(pipeline, Arc::clone(&fallback), events)))
            })
            .build())
    }

    fn bootstrap(&self, container: &Container) -> Result<(), ContainerError> {
        for step in &self.bootstrap {
            step(container)?;
        }
        Ok(())
    }
}
