//! Named gRPC client channels
//!
//! Every channel starts from the `basic` options. A named channel's own
//! options override them field by field, so one shared keepalive or user
//! agent can be set once for all channels.
//!
//! Targets are accepted as `host:port`, `dns:///host:port` or a full
//! `http://` URI and are always dialed in plaintext. Endpoints are validated
//! when the configuration is checked; channels connect on their first call.

use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint, Uri};
use tracing::debug;

/// Options for one client channel; `None` leaves the tonic default
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelOptions {
    pub target: Option<String>,
    pub initial_stream_window_size: Option<u32>,
    pub initial_connection_window_size: Option<u32>,
    pub keep_alive_interval: Option<Duration>,
    pub keep_alive_timeout: Option<Duration>,
    pub keep_alive_while_idle: Option<bool>,
    pub user_agent: Option<String>,
    /// Authority sent in place of the target's
    pub override_authority: Option<String>,
    pub connect_timeout: Option<Duration>,
    /// Deadline applied to every call
    pub request_timeout: Option<Duration>,
    pub tcp_keepalive: Option<Duration>,
    pub concurrency_limit: Option<usize>,
}

impl ChannelOptions {
    /// These options with every unset field taken from `basic`
    pub fn merged_over(&self, basic: &ChannelOptions) -> ChannelOptions {
        ChannelOptions {
            target: self.target.clone().or_else(|| basic.target.clone()),
            initial_stream_window_size: self.initial_stream_window_size.or(basic.initial_stream_window_size),
            initial_connection_window_size: self
                .initial_connection_window_size
                .or(basic.initial_connection_window_size),
            keep_alive_interval: self.keep_alive_interval.or(basic.keep_alive_interval),
            keep_alive_timeout: self.keep_alive_timeout.or(basic.keep_alive_timeout),
            keep_alive_while_idle: self.keep_alive_while_idle.or(basic.keep_alive_while_idle),
            user_agent: self.user_agent.clone().or_else(|| basic.user_agent.clone()),
            override_authority: self
                .override_authority
                .clone()
                .or_else(|| basic.override_authority.clone()),
            connect_timeout: self.connect_timeout.or(basic.connect_timeout),
            request_timeout: self.request_timeout.or(basic.request_timeout),
            tcp_keepalive: self.tcp_keepalive.or(basic.tcp_keepalive),
            concurrency_limit: self.concurrency_limit.or(basic.concurrency_limit),
        }
    }

    /// Build the endpoint for channel `name`
    ///
    /// # Returns
    ///
    /// - `Ok(Endpoint)`: Every option applied
    /// - `Err`: No target, or the target, user agent or authority is malformed
    pub fn endpoint(&self, name: &str) -> Result<Endpoint> {
        let target = self
            .target
            .as_deref()
            .ok_or_else(|| anyhow!("Client channel '{}' has no target", name))?;
        let uri = plaintext_uri(target);

        let mut endpoint = Endpoint::from_shared(uri)
            .with_context(|| format!("Client channel '{}' has invalid target '{}'", name, target))?
            .initial_stream_window_size(self.initial_stream_window_size)
            .initial_connection_window_size(self.initial_connection_window_size)
            .tcp_keepalive(self.tcp_keepalive);

        if let Some(interval) = self.keep_alive_interval {
            endpoint = endpoint.http2_keep_alive_interval(interval);
        }
        if let Some(timeout) = self.keep_alive_timeout {
            endpoint = endpoint.keep_alive_timeout(timeout);
        }
        if let Some(while_idle) = self.keep_alive_while_idle {
            endpoint = endpoint.keep_alive_while_idle(while_idle);
        }
        if let Some(agent) = &self.user_agent {
            endpoint = endpoint
                .user_agent(agent.clone())
                .with_context(|| format!("Client channel '{}' has invalid user agent", name))?;
        }
        if let Some(authority) = &self.override_authority {
            let origin: Uri = plaintext_uri(authority)
                .parse()
                .with_context(|| format!("Client channel '{}' has invalid authority '{}'", name, authority))?;
            endpoint = endpoint.origin(origin);
        }
        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(timeout) = self.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }
        if let Some(limit) = self.concurrency_limit {
            endpoint = endpoint.concurrency_limit(limit);
        }

        Ok(endpoint)
    }
}

fn plaintext_uri(target: &str) -> String {
    if let Some(rest) = target.strip_prefix("dns:///") {
        format!("http://{}", rest)
    } else if target.contains("://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    }
}

/// Client channel configuration: shared options plus one entry per channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    pub basic: ChannelOptions,
    pub channels: BTreeMap<String, ChannelOptions>,
}

impl ClientConfig {
    /// Effective options for channel `name`
    pub fn options(&self, name: &str) -> Option<ChannelOptions> {
        self.channels.get(name).map(|own| own.merged_over(&self.basic))
    }

    /// Build every endpoint, failing on the first invalid channel
    pub fn endpoints(&self) -> Result<BTreeMap<String, Endpoint>> {
        self.channels
            .iter()
            .map(|(name, own)| Ok((name.clone(), own.merged_over(&self.basic).endpoint(name)?)))
            .collect()
    }
}

/// Client channels by name, each connecting on its first call
///
/// Channels are cheap to clone; every clone shares one connection.
#[derive(Debug, Clone, Default)]
pub struct ClientChannels {
    channels: BTreeMap<String, Channel>,
}

impl ClientChannels {
    /// Create a lazy channel for every configured name
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect_lazy(config: &ClientConfig) -> Result<Self> {
        let channels = config
            .endpoints()?
            .into_iter()
            .map(|(name, endpoint)| {
                debug!("Client channel '{}' targets {}", name, endpoint.uri());
                (name, endpoint.connect_lazy())
            })
            .collect();
        Ok(Self { channels })
    }

    /// The channel registered as `name`
    pub fn get(&self, name: &str) -> Option<Channel> {
        self.channels.get(name).cloned()
    }

    /// Channel names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(target: &str) -> ChannelOptions {
        ChannelOptions {
            target: Some(target.to_string()),
            ..ChannelOptions::default()
        }
    }

    fn config(channels: impl IntoIterator<Item = (&'static str, ChannelOptions)>) -> ClientConfig {
        ClientConfig {
            basic: ChannelOptions {
                keep_alive_interval: Some(Duration::from_secs(30)),
                user_agent: Some("registrar/basic".to_string()),
                request_timeout: Some(Duration::from_secs(5)),
                ..ChannelOptions::default()
            },
            channels: channels.into_iter().map(|(n, o)| (n.to_string(), o)).collect(),
        }
    }

    #[test]
    fn channel_options_override_basic_field_by_field() {
        let orders = ChannelOptions {
            user_agent: Some("registrar/orders".to_string()),
            keep_alive_while_idle: Some(true),
            ..target("orders.internal:50051")
        };
        let config = config([("orders", orders)]);

        let merged = config.options("orders").unwrap();
        assert_eq!(merged.target.as_deref(), Some("orders.internal:50051"));
        assert_eq!(merged.user_agent.as_deref(), Some("registrar/orders"));
        assert_eq!(merged.keep_alive_interval, Some(Duration::from_secs(30)));
        assert_eq!(merged.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(merged.keep_alive_while_idle, Some(true));
        assert_eq!(merged.connect_timeout, None);
        assert!(config.options("users").is_none());
    }

    #[test]
    fn basic_target_applies_to_channels_without_one() {
        let mut config = config([("orders", ChannelOptions::default())]);
        assert!(config.endpoints().is_err());

        config.basic.target = Some("gateway:8080".to_string());
        let endpoints = config.endpoints().unwrap();
        assert_eq!(endpoints["orders"].uri().authority().unwrap().as_str(), "gateway:8080");
    }

    #[test]
    fn targets_are_dialed_in_plaintext() {
        let config = config([
            ("bare", target("10.0.0.5:9090")),
            ("dns", target("dns:///users.internal:50051")),
            ("uri", target("http://[fd00::5]:9090")),
        ]);

        let endpoints = config.endpoints().unwrap();
        for (name, authority) in [("bare", "10.0.0.5:9090"), ("dns", "users.internal:50051"), ("uri", "[fd00::5]:9090")] {
            let uri = endpoints[name].uri();
            assert_eq!(uri.scheme_str(), Some("http"), "{}", name);
            assert_eq!(uri.authority().unwrap().as_str(), authority, "{}", name);
        }
    }

    #[test]
    fn missing_target_names_the_channel() {
        let err = ChannelOptions::default().endpoint("orders").unwrap_err();
        assert!(err.to_string().contains("'orders' has no target"), "{}", err);
    }

    #[test]
    fn malformed_options_are_rejected() {
        let bad_target = target("http://exa mple:1");
        assert!(bad_target.endpoint("orders").is_err());

        let bad_agent = ChannelOptions {
            user_agent: Some("registrar\nagent".to_string()),
            ..target("orders:1")
        };
        let err = bad_agent.endpoint("orders").unwrap_err();
        assert!(err.to_string().contains("invalid user agent"), "{}", err);

        let bad_authority = ChannelOptions {
            override_authority: Some("not an authority".to_string()),
            ..target("orders:1")
        };
        assert!(bad_authority.endpoint("orders").is_err());
    }

    #[tokio::test]
    async fn channels_are_created_per_name_without_connecting() {
        let config = config([
            ("users", target("127.0.0.1:1")),
            ("orders", target("127.0.0.1:2")),
        ]);

        let channels = ClientChannels::connect_lazy(&config).unwrap();
        assert_eq!(channels.names().collect::<Vec<_>>(), vec!["orders", "users"]);
        assert!(channels.get("orders").is_some());
        assert!(channels.get("billing").is_none());
        assert!(ClientChannels::connect_lazy(&ClientConfig::default()).unwrap().is_empty());
    }
}
