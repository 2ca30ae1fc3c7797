//! Pipeline facade: one session from identifier to document bytes.
//!
//! Composes the tunnel manager, automation backend, resolver, discoverer,
//! and retriever behind a single lifecycle:
//! `init -> resolve -> discover -> retrieve -> close`. Teardown closes the
//! browser session and ends the tunnel regardless of how the session went.
//!
//! At most one automation session and at most one tunnel subprocess exist
//! per facade instance. Instances are independent; running several in one
//! process multiplies local resource usage (ports, processes, browser
//! memory) linearly.

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::backend::{
    AutomationBackend, BackendError, BackendKind, BackendOptions, create_backend,
};
use crate::discover::{DiscoverError, DiscoveryStrategy, LinkDiscoverer};
use crate::resolver::{DoiResolver, ResolveError, ResolverStrategy, build_resolver};
use crate::retrieve::{ContentRetriever, RetrieveError};
use crate::tunnel::{TunnelError, TunnelManager};

/// Errors surfaced at the pipeline boundary.
///
/// Component errors propagate unmodified; a failed call never poisons
/// subsequent calls on the same facade.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An operation was called in the wrong lifecycle state.
    #[error("cannot {operation} while pipeline is {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the pipeline was in.
        state: &'static str,
    },

    /// Tunnel management failed.
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// The automation backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Identifier resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Link discovery failed.
    #[error(transparent)]
    Discover(#[from] DiscoverError),

    /// Content retrieval failed.
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Created,
    Initialized,
    Closed,
}

impl PipelineState {
    fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Closed => "closed",
        }
    }
}

/// Configures and constructs a [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    backend_kind: BackendKind,
    backend_options: BackendOptions,
    resolver_strategy: ResolverStrategy,
    discovery_strategy: DiscoveryStrategy,
    accept_octet_stream: bool,
}

impl PipelineBuilder {
    fn new() -> Self {
        Self {
            backend_kind: BackendKind::Cdp,
            backend_options: BackendOptions::default(),
            resolver_strategy: ResolverStrategy::default(),
            discovery_strategy: DiscoveryStrategy::default(),
            accept_octet_stream: false,
        }
    }

    /// Selects the automation backend adapter.
    #[must_use]
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend_kind = kind;
        self
    }

    /// Overrides the backend launch and timeout options.
    #[must_use]
    pub fn backend_options(mut self, options: BackendOptions) -> Self {
        self.backend_options = options;
        self
    }

    /// Selects the identifier resolution strategy.
    #[must_use]
    pub fn resolver(mut self, strategy: ResolverStrategy) -> Self {
        self.resolver_strategy = strategy;
        self
    }

    /// Selects the link discovery strategy.
    #[must_use]
    pub fn discovery(mut self, strategy: DiscoveryStrategy) -> Self {
        self.discovery_strategy = strategy;
        self
    }

    /// Accepts `application/octet-stream` document responses, for servers
    /// that mislabel downloads.
    #[must_use]
    pub fn accept_octet_stream(mut self) -> Self {
        self.accept_octet_stream = true;
        self
    }

    /// Constructs the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if resolver construction fails.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let backend = create_backend(self.backend_kind, self.backend_options);
        let resolver = build_resolver(self.resolver_strategy)?;
        let retriever = if self.accept_octet_stream {
            ContentRetriever::new().accept_octet_stream()
        } else {
            ContentRetriever::new()
        };
        let discoverer = LinkDiscoverer::new().with_strategy(self.discovery_strategy);
        Ok(Pipeline::assemble(backend, resolver, discoverer, retriever))
    }
}

/// One document-retrieval session.
pub struct Pipeline {
    backend: Box<dyn AutomationBackend>,
    resolver: Box<dyn DoiResolver>,
    discoverer: LinkDiscoverer,
    retriever: ContentRetriever,
    tunnel: Option<TunnelManager>,
    state: PipelineState,
}

impl Pipeline {
    /// Starts configuring a pipeline.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Assembles a pipeline from pre-built components (custom backends,
    /// test doubles).
    #[must_use]
    pub fn with_components(
        backend: Box<dyn AutomationBackend>,
        resolver: Box<dyn DoiResolver>,
    ) -> Self {
        Self::assemble(
            backend,
            resolver,
            LinkDiscoverer::new(),
            ContentRetriever::new(),
        )
    }

    fn assemble(
        backend: Box<dyn AutomationBackend>,
        resolver: Box<dyn DoiResolver>,
        discoverer: LinkDiscoverer,
        retriever: ContentRetriever,
    ) -> Self {
        Self {
            backend,
            resolver,
            discoverer,
            retriever,
            tunnel: None,
            state: PipelineState::Created,
        }
    }

    fn ensure(
        &self,
        operation: &'static str,
        expected: PipelineState,
    ) -> Result<(), PipelineError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PipelineError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    /// Starts the session: brings up the tunnel (when a proxy specification
    /// is given) and launches the browser behind it.
    ///
    /// A failure at any step tears down whatever came up and leaves the
    /// pipeline un-initialized.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on tunnel or launch failure.
    #[tracing::instrument(skip(self))]
    pub async fn init(&mut self, proxy_spec: Option<&str>) -> Result<(), PipelineError> {
        self.ensure("init", PipelineState::Created)?;

        let mut tunnel = match proxy_spec {
            Some(spec) => {
                let mut tunnel = TunnelManager::new(spec)?;
                tunnel.start().await?;
                Some(tunnel)
            }
            None => None,
        };

        let endpoint = tunnel.as_ref().map(|t| t.url().to_string());
        if let Err(e) = self.backend.init(endpoint.as_deref()).await {
            if let Some(tunnel) = tunnel.as_mut() {
                if let Err(tunnel_error) = tunnel.end().await {
                    warn!(error = %tunnel_error, "tunnel teardown after failed launch also failed");
                }
            }
            return Err(e.into());
        }

        self.tunnel = tunnel;
        self.state = PipelineState::Initialized;
        info!(proxy = ?proxy_spec, "pipeline initialized");
        Ok(())
    }

    /// Resolves an identifier to its landing-page URL.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error, or [`PipelineError::InvalidState`]
    /// outside the initialized state.
    pub async fn resolve_doi_link(&self, identifier: &str) -> Result<Url, PipelineError> {
        self.ensure("resolve", PipelineState::Initialized)?;
        Ok(self.resolver.resolve(identifier).await?)
    }

    /// Discovers candidate document links on a landing page.
    ///
    /// # Errors
    ///
    /// Returns the discoverer's error, or [`PipelineError::InvalidState`]
    /// outside the initialized state.
    pub async fn pdf_links(&self, location: &Url) -> Result<Vec<Url>, PipelineError> {
        self.ensure("discover", PipelineState::Initialized)?;
        Ok(self
            .discoverer
            .discover(self.backend.as_ref(), location)
            .await?)
    }

    /// Retrieves the bytes of a chosen candidate link.
    ///
    /// Repeatable: a failed retrieval does not require re-discovery, and a
    /// different candidate from the same discovered set can be tried next.
    ///
    /// # Errors
    ///
    /// Returns the retriever's error, or [`PipelineError::InvalidState`]
    /// outside the initialized state.
    pub async fn download_pdf(
        &self,
        candidate: &Url,
        location: &Url,
    ) -> Result<Vec<u8>, PipelineError> {
        self.ensure("retrieve", PipelineState::Initialized)?;
        Ok(self
            .retriever
            .retrieve(self.backend.as_ref(), location, candidate)
            .await?)
    }

    /// Ends the session: closes the browser and ends the tunnel.
    ///
    /// Reachable from every state and idempotent; both teardown steps are
    /// always attempted, and the first error (if any) is returned after the
    /// second is logged.
    ///
    /// # Errors
    ///
    /// Returns the first teardown error encountered.
    #[tracing::instrument(skip(self))]
    pub async fn close(&mut self) -> Result<(), PipelineError> {
        if self.state == PipelineState::Closed {
            return Ok(());
        }
        self.state = PipelineState::Closed;

        let backend_result = self.backend.close().await;
        let tunnel_result = match self.tunnel.as_mut() {
            Some(tunnel) => tunnel.end().await,
            None => Ok(()),
        };
        self.tunnel = None;

        match (backend_result, tunnel_result) {
            (Ok(()), Ok(())) => {
                info!("pipeline closed");
                Ok(())
            }
            (Err(backend_error), tunnel_result) => {
                if let Err(tunnel_error) = tunnel_result {
                    warn!(error = %tunnel_error, "tunnel teardown also failed");
                }
                Err(backend_error.into())
            }
            (Ok(()), Err(tunnel_error)) => Err(tunnel_error.into()),
        }
    }
}
