//! Last-known-good server endpoint and the device credential.

use core::net::{Ipv4Addr, SocketAddrV4};

use heapless::String;
use log::{debug, info};

use crate::storage::{
    AccessMode, Namespace, NamespaceBackend, Preferences, PreferencesError, PreferencesResult,
    codec::MAX_STR_BYTES,
};

pub const SERVER_IP_KEY: &str = "ws_ip";
pub const SERVER_PORT_KEY: &str = "ws_port";
pub const AUTH_TOKEN_KEY: &str = "auth_token";

/// Port assumed when only the address was persisted.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

pub type AuthToken = String<MAX_STR_BYTES>;

/// What the `server` namespace currently holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CachedServer {
    Endpoint(SocketAddrV4),
    /// Something is stored but it does not parse as an IPv4 endpoint.
    Malformed,
}

/// Persistence used by discovery and boot.
pub trait EndpointCache {
    type Error: core::fmt::Debug;

    fn load_server(&mut self) -> Result<Option<CachedServer>, Self::Error>;
    fn store_server(&mut self, endpoint: SocketAddrV4) -> Result<(), Self::Error>;
    fn evict_server(&mut self) -> Result<(), Self::Error>;
}

impl<K: EndpointCache> EndpointCache for &mut K {
    type Error = K::Error;

    fn load_server(&mut self) -> Result<Option<CachedServer>, Self::Error> {
        (**self).load_server()
    }

    fn store_server(&mut self, endpoint: SocketAddrV4) -> Result<(), Self::Error> {
        (**self).store_server(endpoint)
    }

    fn evict_server(&mut self) -> Result<(), Self::Error> {
        (**self).evict_server()
    }
}

/// No persistence: nothing is cached and every write is dropped.
impl<K: EndpointCache> EndpointCache for Option<K> {
    type Error = K::Error;

    fn load_server(&mut self) -> Result<Option<CachedServer>, Self::Error> {
        match self {
            Some(cache) => cache.load_server(),
            None => Ok(None),
        }
    }

    fn store_server(&mut self, endpoint: SocketAddrV4) -> Result<(), Self::Error> {
        match self {
            Some(cache) => cache.store_server(endpoint),
            None => Ok(()),
        }
    }

    fn evict_server(&mut self) -> Result<(), Self::Error> {
        match self {
            Some(cache) => cache.evict_server(),
            None => Ok(()),
        }
    }
}

/// [`EndpointCache`] plus credential storage over [`Preferences`].
#[derive(Debug)]
pub struct PersistentCache<B> {
    prefs: Preferences<B>,
}

impl<B: NamespaceBackend> PersistentCache<B> {
    pub const fn new(backend: B) -> Self {
        Self {
            prefs: Preferences::new(backend),
        }
    }

    pub fn preferences(&mut self) -> &mut Preferences<B> {
        &mut self.prefs
    }

    /// Empty string when no credential has been provisioned.
    pub fn load_auth_token(&mut self) -> PreferencesResult<AuthToken, B> {
        let session = self.prefs.open(Namespace::Auth, AccessMode::ReadOnly)?;
        let token = session.get_str(AUTH_TOKEN_KEY).unwrap_or("");
        // Stored strings are bounded by the same capacity.
        Ok(AuthToken::try_from(token).unwrap_or_default())
    }

    pub fn store_auth_token(&mut self, token: &str) -> PreferencesResult<(), B> {
        let mut session = self.prefs.open(Namespace::Auth, AccessMode::ReadWrite)?;
        session.put_str(AUTH_TOKEN_KEY, token)?;
        session.end()
    }

    pub fn clear_auth_token(&mut self) -> PreferencesResult<(), B> {
        let mut session = self.prefs.open(Namespace::Auth, AccessMode::ReadWrite)?;
        session.remove(AUTH_TOKEN_KEY)?;
        session.end()
    }

    /// Wipes both namespaces.
    pub fn factory_reset(&mut self) -> PreferencesResult<(), B> {
        for namespace in Namespace::ALL {
            self.prefs.clear(namespace)?;
        }
        info!("cache: factory reset cleared server and auth namespaces");
        Ok(())
    }
}

impl<B: NamespaceBackend> EndpointCache for PersistentCache<B> {
    type Error = PreferencesError<B::Error>;

    fn load_server(&mut self) -> Result<Option<CachedServer>, Self::Error> {
        let session = self.prefs.open(Namespace::Server, AccessMode::ReadOnly)?;
        let Some(text) = session.get_str(SERVER_IP_KEY) else {
            return Ok(None);
        };
        if text.is_empty() {
            return Ok(None);
        }

        let port = session
            .get_u32(SERVER_PORT_KEY)
            .unwrap_or(DEFAULT_SERVER_PORT as u32);
        let cached = match (text.parse::<Ipv4Addr>(), u16::try_from(port)) {
            (Ok(address), Ok(port)) if port != 0 => {
                CachedServer::Endpoint(SocketAddrV4::new(address, port))
            }
            _ => CachedServer::Malformed,
        };
        Ok(Some(cached))
    }

    fn store_server(&mut self, endpoint: SocketAddrV4) -> Result<(), Self::Error> {
        let mut text: String<15> = String::new();
        // 15 bytes always fit a dotted quad.
        let _ = core::fmt::write(&mut text, format_args!("{}", endpoint.ip()));

        let mut session = self.prefs.open(Namespace::Server, AccessMode::ReadWrite)?;
        session.put_str(SERVER_IP_KEY, &text)?;
        session.put_u32(SERVER_PORT_KEY, endpoint.port() as u32)?;
        session.end()?;
        debug!("cache: stored server {}", endpoint);
        Ok(())
    }

    fn evict_server(&mut self) -> Result<(), Self::Error> {
        let mut session = self.prefs.open(Namespace::Server, AccessMode::ReadWrite)?;
        session.remove(SERVER_IP_KEY)?;
        session.remove(SERVER_PORT_KEY)?;
        session.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::MemoryBackend;

    fn endpoint(a: u8, b: u8, c: u8, d: u8, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(a, b, c, d), port)
    }

    #[test]
    fn missing_cache_stores_nothing() {
        let mut cache: Option<PersistentCache<MemoryBackend>> = None;
        cache.store_server(endpoint(192, 168, 1, 50, 8000)).unwrap();
        assert_eq!(cache.load_server().unwrap(), None);
        cache.evict_server().unwrap();
    }

    #[test]
    fn stored_endpoint_reads_back_exactly() {
        let mut cache = PersistentCache::new(MemoryBackend::new());
        let server = endpoint(192, 168, 1, 50, 8000);

        cache.store_server(server).unwrap();
        assert_eq!(
            cache.load_server().unwrap(),
            Some(CachedServer::Endpoint(server))
        );
    }

    #[test]
    fn storing_the_same_endpoint_twice_is_idempotent() {
        let mut cache = PersistentCache::new(MemoryBackend::new());
        let server = endpoint(10, 0, 0, 9, 8000);

        cache.store_server(server).unwrap();
        let first = cache.preferences().backend_mut().raw(Namespace::Server).unwrap().to_vec();
        cache.store_server(server).unwrap();

        let backend = cache.preferences().backend_mut();
        assert_eq!(backend.writes, 1);
        assert_eq!(backend.raw(Namespace::Server).unwrap(), first.as_slice());
    }

    #[test]
    fn eviction_is_visible_on_next_read() {
        let mut cache = PersistentCache::new(MemoryBackend::new());
        cache.store_server(endpoint(10, 0, 0, 9, 8000)).unwrap();

        cache.evict_server().unwrap();
        assert_eq!(cache.load_server().unwrap(), None);
    }

    #[test]
    fn missing_port_defaults_to_well_known_port() {
        let mut cache = PersistentCache::new(MemoryBackend::new());
        let mut session = cache
            .preferences()
            .open(Namespace::Server, AccessMode::ReadWrite)
            .unwrap();
        session.put_str(SERVER_IP_KEY, "10.0.0.9").unwrap();
        session.end().unwrap();

        assert_eq!(
            cache.load_server().unwrap(),
            Some(CachedServer::Endpoint(endpoint(10, 0, 0, 9, DEFAULT_SERVER_PORT)))
        );
    }

    #[test]
    fn unparseable_address_is_reported_as_malformed() {
        let mut cache = PersistentCache::new(MemoryBackend::new());
        let mut session = cache
            .preferences()
            .open(Namespace::Server, AccessMode::ReadWrite)
            .unwrap();
        session.put_str(SERVER_IP_KEY, "elato.local").unwrap();
        session.put_u32(SERVER_PORT_KEY, 70_000).unwrap();
        session.end().unwrap();

        assert_eq!(cache.load_server().unwrap(), Some(CachedServer::Malformed));
    }

    #[test]
    fn auth_token_lives_in_its_own_namespace() {
        let mut cache = PersistentCache::new(MemoryBackend::new());
        assert_eq!(cache.load_auth_token().unwrap().as_str(), "");

        cache.store_auth_token("secret-token").unwrap();
        cache.store_server(endpoint(10, 0, 0, 9, 8000)).unwrap();
        cache.evict_server().unwrap();
        assert_eq!(cache.load_auth_token().unwrap().as_str(), "secret-token");

        cache.clear_auth_token().unwrap();
        assert_eq!(cache.load_auth_token().unwrap().as_str(), "");
    }

    #[test]
    fn factory_reset_clears_everything() {
        let mut cache = PersistentCache::new(MemoryBackend::new());
        cache.store_auth_token("secret-token").unwrap();
        cache.store_server(endpoint(10, 0, 0, 9, 8000)).unwrap();

        cache.factory_reset().unwrap();
        assert_eq!(cache.load_server().unwrap(), None);
        assert_eq!(cache.load_auth_token().unwrap().as_str(), "");
    }
}
