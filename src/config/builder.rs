//! Fluent, staged assembly of a service bus.

use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::settings::{EndpointSettings, Serialization};
use crate::bus::{BusParts, ServiceBus};
use crate::codec::{Codec, JsonCodec};
use crate::endpoint::{Endpoint, EndpointConfig, Role};
use crate::error::{BusResult, ConfigurationError};
use crate::message::{Message, MessageKind};
use crate::transport::{AckMode, Connection, Distribution, Transport};

/// Default buffer of each per-kind stream.
pub const DEFAULT_STREAM_CAPACITY: usize = 1024;

/// Collects endpoint groups and bus-wide options, validated by
/// [`create`](ServiceBusBuilder::create).
pub struct ServiceBusBuilder<M: Message> {
    groups: Vec<PendingGroup<M>>,
    problems: Vec<String>,
    logging: bool,
    stream_capacity: usize,
}

struct PendingGroup<M: Message> {
    transport: Arc<dyn Transport>,
    service: Option<String>,
    bindings: Vec<QueueBinding>,
    broker_uri: Option<String>,
    codec: Option<Arc<dyn Codec<M>>>,
    role: Option<Role>,
}

#[derive(Debug, Clone)]
struct QueueBinding {
    kind: MessageKind,
    queue: Option<String>,
    distribution: Option<Distribution>,
    ack_mode: AckMode,
    message_types: Option<Vec<String>>,
}

struct GroupPlan<M: Message> {
    transport: Arc<dyn Transport>,
    broker_uri: String,
    codec: Arc<dyn Codec<M>>,
    endpoints: Vec<EndpointConfig>,
}

impl<M: Message> Default for ServiceBusBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> ServiceBusBuilder<M> {
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            problems: Vec::new(),
            logging: false,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
        }
    }

    /// Begin an endpoint group carried by `transport`.
    pub fn with_transport_endpoints<T: Transport + 'static>(
        self,
        transport: T,
    ) -> EndpointGroupBuilder<M> {
        EndpointGroupBuilder {
            parent: self,
            group: PendingGroup {
                transport: Arc::new(transport),
                service: None,
                bindings: Vec::new(),
                broker_uri: None,
                codec: None,
                role: None,
            },
        }
    }

    /// Add an endpoint group described by a settings document.
    pub fn with_endpoint_settings<T: Transport + 'static>(
        self,
        transport: T,
        settings: EndpointSettings,
    ) -> Self
    where
        M: Serialize + DeserializeOwned,
    {
        let mut group = self
            .with_transport_endpoints(transport)
            .named(settings.service)
            .connect_to_broker(settings.broker_uri);

        for queue in settings.queues {
            let mut binding = group.using_queue_for(queue.kind);
            if let Some(name) = queue.queue {
                binding = binding.queue(name);
            }
            if let Some(types) = queue.message_types {
                binding = binding.for_types(types);
            }
            if let Some(distribution) = queue.distribution {
                binding = binding.distribution(distribution);
            }
            group = binding.acknowledge(queue.ack_mode);
        }

        group = match settings.serialization {
            Serialization::Json => group.serialized_as_json(),
            #[cfg(feature = "bitcode")]
            Serialization::Bitcode => group.serialized_as_bitcode(),
            #[cfg(not(feature = "bitcode"))]
            Serialization::Bitcode => {
                group
                    .parent
                    .problems
                    .push("bitcode serialization requires the `bitcode` feature".to_string());
                group
            }
        };

        group.finish(Some(settings.role))
    }

    /// Add one endpoint group per settings document, in order.
    pub fn with_endpoint_settings_list<T: Transport + Clone + 'static>(
        self,
        transport: T,
        settings: Vec<EndpointSettings>,
    ) -> Self
    where
        M: Serialize + DeserializeOwned,
    {
        settings.into_iter().fold(self, |builder, group| {
            builder.with_endpoint_settings(transport.clone(), group)
        })
    }

    /// Log every message sent and received at `debug`.
    pub fn using_logging(mut self) -> Self {
        self.logging = true;
        self
    }

    /// Buffer size of each per-kind stream. Slower subscribers see
    /// `BusError::Lagged`.
    pub fn with_stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    /// Check the configuration and list the endpoints it would create, in
    /// registration order.
    pub fn validate(&self) -> Result<Vec<EndpointConfig>, ConfigurationError> {
        let mut problems = self.problems.clone();
        let mut endpoints = Vec::new();

        if self.groups.is_empty() {
            problems.push("no endpoint groups configured".to_string());
        }
        if self.stream_capacity == 0 {
            problems.push("stream capacity must be at least 1".to_string());
        }

        let mut names = HashSet::new();
        for (index, group) in self.groups.iter().enumerate() {
            let label = match group.service.as_deref() {
                Some(name) if !name.trim().is_empty() => {
                    if !names.insert(name) {
                        problems.push(format!("service name {} is configured twice", name));
                    }
                    format!("endpoint group {}", name)
                }
                _ => {
                    problems.push(format!("endpoint group #{} has no name", index + 1));
                    format!("endpoint group #{}", index + 1)
                }
            };

            if group
                .broker_uri
                .as_deref()
                .map_or(true, |uri| uri.trim().is_empty())
            {
                problems.push(format!("{} has no broker uri", label));
            }
            if group.codec.is_none() {
                problems.push(format!("{} has no serializer", label));
            }
            let Some(role) = group.role else {
                problems.push(format!("{} has no role", label));
                continue;
            };
            let service = match group.service.as_deref() {
                Some(name) if !name.trim().is_empty() => name,
                _ => continue,
            };

            let mut bound = HashSet::new();
            for config in group.resolve(service, role) {
                if !bound.insert((config.kind, config.queue.clone())) {
                    problems.push(format!(
                        "{} binds queue {} for {} twice",
                        label, config.queue, config.kind
                    ));
                }
                if matches!(&config.message_types, Some(types) if types.is_empty()) {
                    problems.push(format!(
                        "{} has an empty type filter on queue {}",
                        label, config.queue
                    ));
                }
                endpoints.push(config);
            }
        }

        if problems.is_empty() {
            Ok(endpoints)
        } else {
            Err(ConfigurationError::new(problems))
        }
    }

    /// Validate, connect every endpoint group and start the bus.
    ///
    /// Connections are opened here, one per group, and every receiving
    /// endpoint is subscribed. If any connect or subscribe fails the
    /// connections already opened are closed and the error is returned.
    pub async fn create(self) -> BusResult<ServiceBus<M>> {
        self.validate()?;
        let logging = self.logging;
        let stream_capacity = self.stream_capacity;
        let first_service = self
            .groups
            .first()
            .and_then(|g| g.service.clone())
            .unwrap_or_default();
        let plans = self.into_plans();

        let mut connections: Vec<Arc<dyn Connection>> = Vec::new();
        let mut endpoints = Vec::new();
        for plan in plans {
            let connection = match plan.transport.connect(&plan.broker_uri).await {
                Ok(connection) => connection,
                Err(error) => {
                    tracing::warn!(uri = %plan.broker_uri, error = %error, "connect failed");
                    for opened in &connections {
                        let _ = opened.close().await;
                    }
                    return Err(error.into());
                }
            };
            for config in plan.endpoints {
                endpoints.push(Endpoint::new(
                    config,
                    Arc::clone(&connection),
                    Arc::clone(&plan.codec),
                ));
            }
            connections.push(connection);
        }

        ServiceBus::start(BusParts {
            requester_id: format!("{}-{}", first_service, Uuid::new_v4()),
            endpoints,
            connections,
            stream_capacity,
            logging,
        })
        .await
    }

    /// Only called after `validate` succeeded.
    fn into_plans(self) -> Vec<GroupPlan<M>> {
        self.groups
            .into_iter()
            .filter_map(|group| {
                let service = group.service.clone()?;
                let role = group.role?;
                let endpoints = group.resolve(&service, role);
                Some(GroupPlan {
                    transport: group.transport,
                    broker_uri: group.broker_uri?,
                    codec: group.codec?,
                    endpoints,
                })
            })
            .collect()
    }
}

impl<M: Message> PendingGroup<M> {
    /// Explicit bindings per kind, or the default destination when a kind
    /// has none.
    fn resolve(&self, service: &str, role: Role) -> Vec<EndpointConfig> {
        let mut endpoints = Vec::new();
        for kind in MessageKind::ALL {
            let explicit: Vec<&QueueBinding> =
                self.bindings.iter().filter(|b| b.kind == kind).collect();
            if explicit.is_empty() {
                endpoints.push(EndpointConfig {
                    service: service.to_string(),
                    kind,
                    queue: EndpointConfig::default_queue(service, kind),
                    distribution: EndpointConfig::default_distribution(kind),
                    ack_mode: AckMode::AutoAcknowledge,
                    role,
                    message_types: None,
                });
                continue;
            }
            for binding in explicit {
                endpoints.push(EndpointConfig {
                    service: service.to_string(),
                    kind,
                    queue: binding
                        .queue
                        .clone()
                        .unwrap_or_else(|| EndpointConfig::default_queue(service, kind)),
                    distribution: binding
                        .distribution
                        .unwrap_or_else(|| EndpointConfig::default_distribution(kind)),
                    ack_mode: binding.ack_mode,
                    role,
                    message_types: binding.message_types.clone(),
                });
            }
        }
        endpoints
    }
}

/// Configures one endpoint group: a service name, its queues, a broker, a
/// codec and a role.
pub struct EndpointGroupBuilder<M: Message> {
    parent: ServiceBusBuilder<M>,
    group: PendingGroup<M>,
}

impl<M: Message> EndpointGroupBuilder<M> {
    /// Service name; also the prefix of default queue names.
    pub fn named(mut self, service: impl Into<String>) -> Self {
        self.group.service = Some(service.into());
        self
    }

    /// Bind a queue for `kind`. Without one a kind uses
    /// `"<service>.<kinds>"` with auto-acknowledge; events and responses as
    /// topics, commands and requests as queues.
    pub fn using_queue_for(self, kind: MessageKind) -> QueueBuilder<M> {
        QueueBuilder {
            group: self,
            binding: QueueBinding {
                kind,
                queue: None,
                distribution: None,
                ack_mode: AckMode::AutoAcknowledge,
                message_types: None,
            },
        }
    }

    pub fn connect_to_broker(mut self, uri: impl Into<String>) -> Self {
        self.group.broker_uri = Some(uri.into());
        self
    }

    pub fn serialized_as<C: Codec<M> + 'static>(mut self, codec: C) -> Self {
        self.group.codec = Some(Arc::new(codec));
        self
    }

    pub fn serialized_as_json(self) -> Self
    where
        M: Serialize + DeserializeOwned,
    {
        self.serialized_as(JsonCodec)
    }

    #[cfg(feature = "bitcode")]
    pub fn serialized_as_bitcode(self) -> Self
    where
        M: Serialize + DeserializeOwned,
    {
        self.serialized_as(crate::codec::BitcodeCodec)
    }

    pub fn as_client(self) -> ServiceBusBuilder<M> {
        self.finish(Some(Role::Client))
    }

    pub fn as_server(self) -> ServiceBusBuilder<M> {
        self.finish(Some(Role::Server))
    }

    pub fn as_client_and_server(self) -> ServiceBusBuilder<M> {
        self.finish(Some(Role::ClientAndServer))
    }

    /// Finish without choosing a role; `create` will report it.
    pub async fn create(self) -> BusResult<ServiceBus<M>> {
        self.finish(None).create().await
    }

    fn finish(mut self, role: Option<Role>) -> ServiceBusBuilder<M> {
        self.group.role = role;
        self.parent.groups.push(self.group);
        self.parent
    }
}

/// Configures one queue binding.
pub struct QueueBuilder<M: Message> {
    group: EndpointGroupBuilder<M>,
    binding: QueueBinding,
}

impl<M: Message> QueueBuilder<M> {
    /// Use `name` instead of the default queue name.
    pub fn queue(mut self, name: impl Into<String>) -> Self {
        self.binding.queue = Some(name.into());
        self
    }

    /// Send only these message types through this queue.
    pub fn for_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.binding.message_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Deliver every message to each subscribing bus.
    pub fn fan_out(self) -> Self {
        self.distribution(Distribution::Topic)
    }

    /// Deliver each message to one consumer only.
    pub fn point_to_point(self) -> Self {
        self.distribution(Distribution::Queue)
    }

    pub fn distribution(mut self, distribution: Distribution) -> Self {
        self.binding.distribution = Some(distribution);
        self
    }

    pub fn auto_acknowledge(self) -> EndpointGroupBuilder<M> {
        self.acknowledge(AckMode::AutoAcknowledge)
    }

    pub fn client_acknowledge(self) -> EndpointGroupBuilder<M> {
        self.acknowledge(AckMode::ClientAcknowledge)
    }

    pub fn acknowledge(mut self, ack_mode: AckMode) -> EndpointGroupBuilder<M> {
        self.binding.ack_mode = ack_mode;
        let mut group = self.group;
        group.group.bindings.push(self.binding);
        group
    }
}
