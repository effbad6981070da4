//! Placement of the allocator and generator roles.
//!
//! A process can own an allocator, a generator, both or neither; whichever
//! role it does not own is reached over gRPC. [`Topology::assemble`] turns a
//! [`TopologyConfig`] into the concrete objects once at startup:
//!
//! 1. With allocator hosts configured, a process that has a storage backend
//!    builds an [`Allocator`] and serves it on the first host. Its requester
//!    defaults to [`Requester::Remote`] over all hosts.
//! 2. Without allocator hosts the requester defaults to
//!    [`Requester::Local`], which needs the in-process allocator.
//! 3. With generator hosts configured, a process that serves the generator
//!    builds one and serves it on the first host. Callers of this process
//!    always go through [`GeneratorBinding::Remote`] in that case.
//! 4. The requester is only resolved when a local generator is built, so a
//!    pure client needs no allocator settings.
//!
//! Contradictory settings fail with [`Error::Configuration`].

#[cfg(test)]
mod tests;

use crate::server::config::{RequesterKind, TopologyConfig};
use batchid::{
    Allocator, Batch, BatchRequester, Error, IdGenerator, LocalRequester, Result, ShardKey,
    TagConfigs, validate_tag,
};
use batchid_tonic_core::{HostAddr, RemoteGenerator, RemoteRequester};
use std::sync::Arc;

/// The generator this process owns, whatever its allocator placement.
pub type LocalGenerator = IdGenerator<Requester>;

/// The one way this process fetches batches.
#[derive(Clone)]
pub enum Requester {
    Local(LocalRequester),
    Remote(RemoteRequester),
}

impl BatchRequester for Requester {
    async fn get_batch(&self, tag: &str, shard: &ShardKey) -> Result<Batch> {
        match self {
            Self::Local(requester) => requester.get_batch(tag, shard).await,
            Self::Remote(requester) => requester.get_batch(tag, shard).await,
        }
    }
}

/// The generator contract as seen by code in this process.
///
/// Both variants reject a `batch_generate` above `max_batch_generate` with
/// [`Error::InvalidRequest`]; a remote generator also applies its own limit.
#[derive(Clone)]
pub enum GeneratorBinding {
    Local(Arc<LocalGenerator>),
    Remote(RemoteGenerator),
}

impl GeneratorBinding {
    pub async fn generate(&self, tag: &str, shard: impl Into<ShardKey>) -> Result<u64> {
        match self {
            Self::Local(generator) => generator.generate(tag, shard).await,
            Self::Remote(generator) => generator.generate(tag, shard).await,
        }
    }

    pub async fn batch_generate(
        &self,
        tag: &str,
        count: u64,
        shard: impl Into<ShardKey>,
    ) -> Result<Vec<u64>> {
        match self {
            Self::Local(generator) => generator.batch_generate(tag, count, shard).await,
            Self::Remote(generator) => generator.batch_generate(tag, count, shard).await,
        }
    }

    /// Asking a remote generator can fail; a local answer never does.
    pub async fn was_loaded(&self, tag: &str) -> Result<bool> {
        match self {
            Self::Local(generator) => Ok(generator.was_loaded(tag)),
            Self::Remote(generator) => generator.was_loaded(tag).await,
        }
    }

    pub async fn preload(&self, tag: &str, shard: impl Into<ShardKey>) -> Result<()> {
        match self {
            Self::Local(generator) => generator.preload(tag, shard).await,
            Self::Remote(generator) => generator.preload(tag, shard).await,
        }
    }

    /// Loads the default shard of `tag` unless the generator already holds a
    /// batch of it. Returns whether a batch was fetched.
    pub async fn ensure_loaded(&self, tag: &str) -> Result<bool> {
        if self.was_loaded(tag).await? {
            return Ok(false);
        }
        self.preload(tag, ShardKey::default()).await?;
        Ok(true)
    }
}

/// An endpoint this process must serve.
#[derive(Clone)]
pub struct Endpoint<S> {
    pub addr: HostAddr,
    pub service: S,
}

/// The assembled roles of this process.
pub struct Topology {
    pub binding: GeneratorBinding,
    pub allocator_endpoint: Option<Endpoint<Arc<Allocator>>>,
    pub generator_endpoint: Option<Endpoint<Arc<LocalGenerator>>>,
}

impl Topology {
    /// Builds every role `config` places in this process.
    ///
    /// Remote channels connect lazily, so nothing is dialed here, but the
    /// call must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the settings contradict each
    /// other, and [`Error::InvalidTag`] for an unusable preload tag.
    pub fn assemble(config: &TopologyConfig) -> Result<Self> {
        if config.requester == Some(RequesterKind::Remote) && config.allocator_hosts.is_empty() {
            return Err(configuration(
                "requester `remote` needs at least one allocator host",
            ));
        }
        if config.serve_generator && config.generator_hosts.is_empty() {
            return Err(configuration(
                "serving the generator needs at least one generator host",
            ));
        }
        for tag in &config.preload_tags {
            validate_tag(tag)?;
        }

        let allocator = config.storage.as_ref().map(|storage| {
            Arc::new(Allocator::new(
                storage.open(),
                TagConfigs::from_dir(&config.tag_config_dir),
            ))
        });

        let allocator_endpoint = match (config.allocator_hosts.first(), &allocator) {
            (Some(addr), Some(allocator)) => Some(Endpoint {
                addr: addr.clone(),
                service: Arc::clone(allocator),
            }),
            _ => None,
        };

        let needs_local_generator = config.generator_hosts.is_empty() || config.serve_generator;
        let local_generator = if needs_local_generator {
            let requester = resolve_requester(config, allocator.as_ref())?;
            Some(Arc::new(
                LocalGenerator::new(requester).with_max_batch_generate(config.max_batch_generate),
            ))
        } else {
            None
        };

        let generator_endpoint = match (config.generator_hosts.first(), &local_generator) {
            (Some(addr), Some(generator)) if config.serve_generator => Some(Endpoint {
                addr: addr.clone(),
                service: Arc::clone(generator),
            }),
            _ => None,
        };

        let binding = match local_generator {
            Some(generator) if config.generator_hosts.is_empty() => {
                GeneratorBinding::Local(generator)
            }
            _ => GeneratorBinding::Remote(
                RemoteGenerator::connect_lazy(&config.generator_hosts, config.request_timeout)?
                    .with_max_batch_generate(config.max_batch_generate),
            ),
        };

        Ok(Self {
            binding,
            allocator_endpoint,
            generator_endpoint,
        })
    }

    /// Human readable summary of the roles, for startup logs.
    pub fn describe(&self) -> String {
        let binding = match &self.binding {
            GeneratorBinding::Local(generator) => match generator.requester() {
                Requester::Local(_) => "local generator, local allocator",
                Requester::Remote(_) => "local generator, remote allocator",
            },
            GeneratorBinding::Remote(_) => "remote generator",
        };
        let mut parts = vec![binding.to_owned()];
        if let Some(endpoint) = &self.allocator_endpoint {
            parts.push(format!("serving allocator on {}", endpoint.addr));
        }
        if let Some(endpoint) = &self.generator_endpoint {
            parts.push(format!("serving generator on {}", endpoint.addr));
        }
        parts.join("; ")
    }
}

fn resolve_requester(
    config: &TopologyConfig,
    allocator: Option<&Arc<Allocator>>,
) -> Result<Requester> {
    let kind = config.requester.unwrap_or(if config.allocator_hosts.is_empty() {
        RequesterKind::Local
    } else {
        RequesterKind::Remote
    });

    match kind {
        RequesterKind::Local => allocator
            .map(|allocator| Requester::Local(LocalRequester::new(Arc::clone(allocator))))
            .ok_or_else(|| {
                configuration("a local requester needs a storage backend for the allocator")
            }),
        RequesterKind::Remote => {
            RemoteRequester::connect_lazy(&config.allocator_hosts, config.request_timeout)
                .map(Requester::Remote)
        }
    }
}

fn configuration(reason: &str) -> Error {
    Error::Configuration {
        reason: reason.to_owned(),
    }
}
