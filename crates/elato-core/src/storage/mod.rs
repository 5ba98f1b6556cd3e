//! Namespaced key-value persistence with scoped sessions.
//!
//! A [`Session`] loads one namespace, serves reads and buffered writes, and
//! commits on [`Session::end`]. Dropping a read-write session without calling
//! `end` discards its changes.

pub mod codec;

use core::fmt::Debug;

use log::warn;

use codec::{CodecError, MAX_STR_BYTES, NamespaceRecord, RECORD_CAPACITY, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Namespace {
    Server,
    Auth,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Server, Namespace::Auth];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Auth => "auth",
        }
    }

    pub(crate) const fn tag(self) -> u8 {
        match self {
            Self::Server => 1,
            Self::Auth => 2,
        }
    }
}

/// Raw record storage, one slot per namespace.
pub trait NamespaceBackend {
    type Error: Debug;

    /// Copies the slot for `namespace` into `buf` and returns how many bytes
    /// are meaningful, or `None` if the slot is erased.
    fn read(&mut self, namespace: Namespace, buf: &mut [u8])
    -> Result<Option<usize>, Self::Error>;

    fn write(&mut self, namespace: Namespace, record: &[u8]) -> Result<(), Self::Error>;

    fn erase(&mut self, namespace: Namespace) -> Result<(), Self::Error>;
}

impl<B: NamespaceBackend> NamespaceBackend for &mut B {
    type Error = B::Error;

    fn read(
        &mut self,
        namespace: Namespace,
        buf: &mut [u8],
    ) -> Result<Option<usize>, Self::Error> {
        (**self).read(namespace, buf)
    }

    fn write(&mut self, namespace: Namespace, record: &[u8]) -> Result<(), Self::Error> {
        (**self).write(namespace, record)
    }

    fn erase(&mut self, namespace: Namespace) -> Result<(), Self::Error> {
        (**self).erase(namespace)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PreferencesError<E> {
    Backend(E),
    Codec(CodecError),
    ReadOnly,
}

impl<E> From<CodecError> for PreferencesError<E> {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

pub type PreferencesResult<T, B> = Result<T, PreferencesError<<B as NamespaceBackend>::Error>>;

#[derive(Debug)]
pub struct Preferences<B> {
    backend: B,
}

impl<B: NamespaceBackend> Preferences<B> {
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Opens `namespace`. A corrupt record is logged and treated as empty so
    /// the next committed write replaces it.
    pub fn open(
        &mut self,
        namespace: Namespace,
        mode: AccessMode,
    ) -> PreferencesResult<Session<'_, B>, B> {
        let mut buf = [0u8; RECORD_CAPACITY];
        let record = match self
            .backend
            .read(namespace, &mut buf)
            .map_err(PreferencesError::Backend)?
        {
            None => NamespaceRecord::new(),
            Some(len) => match codec::decode(namespace, &buf[..len.min(buf.len())]) {
                Ok(record) => record,
                Err(CodecError::BadMagic) => NamespaceRecord::new(),
                Err(err) => {
                    warn!(
                        "prefs: namespace={} unreadable ({:?}); starting empty",
                        namespace.name(),
                        err
                    );
                    NamespaceRecord::new()
                }
            },
        };

        Ok(Session {
            backend: &mut self.backend,
            namespace,
            mode,
            record,
            dirty: false,
        })
    }

    /// Erases every key in `namespace` without decoding it.
    pub fn clear(&mut self, namespace: Namespace) -> PreferencesResult<(), B> {
        self.backend
            .erase(namespace)
            .map_err(PreferencesError::Backend)
    }
}

pub struct Session<'p, B: NamespaceBackend> {
    backend: &'p mut B,
    namespace: Namespace,
    mode: AccessMode,
    record: NamespaceRecord,
    dirty: bool,
}

impl<B: NamespaceBackend> Session<'_, B> {
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.record.get(key)? {
            Value::Str(text) => Some(text.as_str()),
            Value::U32(_) => None,
        }
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.record.get(key)? {
            Value::U32(value) => Some(*value),
            Value::Str(_) => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.record.get(key).is_some()
    }

    pub fn put_str(&mut self, key: &str, value: &str) -> PreferencesResult<(), B> {
        self.ensure_writable()?;
        let text = heapless::String::<MAX_STR_BYTES>::try_from(value)
            .map_err(|_| CodecError::ValueTooLong)?;
        self.dirty |= self.record.insert(key, Value::Str(text))?;
        Ok(())
    }

    pub fn put_u32(&mut self, key: &str, value: u32) -> PreferencesResult<(), B> {
        self.ensure_writable()?;
        self.dirty |= self.record.insert(key, Value::U32(value))?;
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> PreferencesResult<bool, B> {
        self.ensure_writable()?;
        let removed = self.record.remove(key);
        self.dirty |= removed;
        Ok(removed)
    }

    /// Commits buffered writes. Nothing touches the backend when the session
    /// made no effective change.
    pub fn end(mut self) -> PreferencesResult<(), B> {
        if !self.dirty {
            return Ok(());
        }
        if self.record.is_empty() {
            return self
                .backend
                .erase(self.namespace)
                .map_err(PreferencesError::Backend);
        }

        let mut buf = [0u8; RECORD_CAPACITY];
        let len = codec::encode(self.namespace, &self.record, &mut buf)?;
        self.backend
            .write(self.namespace, &buf[..len])
            .map_err(PreferencesError::Backend)
    }

    fn ensure_writable(&self) -> PreferencesResult<(), B> {
        match self.mode {
            AccessMode::ReadWrite => Ok(()),
            AccessMode::ReadOnly => Err(PreferencesError::ReadOnly),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests;
