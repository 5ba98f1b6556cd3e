use super::{Namespace, NamespaceBackend};

/// RAM-backed slots with write/erase counters.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    server: Option<std::vec::Vec<u8>>,
    auth: Option<std::vec::Vec<u8>>,
    pub writes: usize,
    pub erases: usize,
    pub fail_writes: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, namespace: Namespace) -> Option<&[u8]> {
        self.slot(namespace).as_deref()
    }

    pub fn corrupt(&mut self, namespace: Namespace, offset: usize) {
        if let Some(bytes) = self.slot_mut(namespace).as_mut() {
            bytes[offset] ^= 0x5A;
        }
    }

    fn slot(&self, namespace: Namespace) -> &Option<std::vec::Vec<u8>> {
        match namespace {
            Namespace::Server => &self.server,
            Namespace::Auth => &self.auth,
        }
    }

    fn slot_mut(&mut self, namespace: Namespace) -> &mut Option<std::vec::Vec<u8>> {
        match namespace {
            Namespace::Server => &mut self.server,
            Namespace::Auth => &mut self.auth,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WriteRejected;

impl NamespaceBackend for MemoryBackend {
    type Error = WriteRejected;

    fn read(
        &mut self,
        namespace: Namespace,
        buf: &mut [u8],
    ) -> Result<Option<usize>, Self::Error> {
        let Some(bytes) = self.slot(namespace) else {
            return Ok(None);
        };
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Ok(Some(len))
    }

    fn write(&mut self, namespace: Namespace, record: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(WriteRejected);
        }
        self.writes += 1;
        *self.slot_mut(namespace) = Some(record.to_vec());
        Ok(())
    }

    fn erase(&mut self, namespace: Namespace) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(WriteRejected);
        }
        self.erases += 1;
        *self.slot_mut(namespace) = None;
        Ok(())
    }
}
