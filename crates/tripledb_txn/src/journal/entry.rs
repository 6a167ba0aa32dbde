//! Journal entry types and serialization.

use crate::component::ComponentId;
use crate::error::{TxnError, TxnResult};
use crate::types::TxnId;

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"TJNL";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Header size: magic (4) + version (2) + length (4).
pub(crate) const HEADER_SIZE: usize = 10;

/// Trailing CRC size.
pub(crate) const CRC_SIZE: usize = 4;

/// One committed write transaction as recorded in the journal.
///
/// Holds the payload every component produced in `prepare_commit`, in
/// registration order. Components that returned `None` have no pair here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// The committing transaction.
    pub txn_id: TxnId,
    /// `(component, payload)` pairs.
    pub payloads: Vec<(ComponentId, Vec<u8>)>,
}

impl JournalEntry {
    /// Creates an entry with no payloads.
    #[must_use]
    pub fn new(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            payloads: Vec::new(),
        }
    }

    /// Adds a component payload.
    pub fn push(&mut self, component: ComponentId, payload: Vec<u8>) {
        self.payloads.push((component, payload));
    }

    /// The payload recorded for `component`, if any.
    #[must_use]
    pub fn payload_for(&self, component: ComponentId) -> Option<&[u8]> {
        self.payloads
            .iter()
            .find(|(id, _)| *id == component)
            .map(|(_, bytes)| bytes.as_slice())
    }

    /// Serializes the entry payload (without envelope).
    ///
    /// # Errors
    ///
    /// Fails if a component payload or the pair count does not fit in a
    /// `u32`.
    pub fn encode_payload(&self) -> TxnResult<Vec<u8>> {
        let count = u32::try_from(self.payloads.len())
            .map_err(|_| TxnError::protocol("too many component payloads in one entry"))?;
        let body: usize = self.payloads.iter().map(|(_, p)| 20 + p.len()).sum();

        let mut buf = Vec::with_capacity(12 + body);
        buf.extend_from_slice(&self.txn_id.as_u64().to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        for (component, payload) in &self.payloads {
            let len = u32::try_from(payload.len()).map_err(|_| {
                TxnError::component(*component, "payload exceeds 4 GiB journal limit")
            })?;
            buf.extend_from_slice(component.as_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(payload);
        }
        Ok(buf)
    }

    /// Deserializes an entry payload.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::JournalCorruption`] if the payload is malformed.
    pub fn decode_payload(payload: &[u8]) -> TxnResult<Self> {
        let mut cursor = Cursor { payload, pos: 0 };

        let txn_id = TxnId::new(cursor.read_u64()?);
        let count = cursor.read_u32()?;

        let mut payloads = Vec::new();
        for _ in 0..count {
            let component = ComponentId::from_slice(cursor.take(16)?)
                .ok_or_else(|| TxnError::journal_corruption("invalid component id"))?;
            let len = cursor.read_u32()? as usize;
            let bytes = cursor.take(len)?.to_vec();
            payloads.push((component, bytes));
        }

        if cursor.pos != payload.len() {
            return Err(TxnError::journal_corruption(format!(
                "trailing bytes in entry for {txn_id}: expected {} bytes, got {}",
                cursor.pos,
                payload.len()
            )));
        }

        Ok(Self { txn_id, payloads })
    }

    /// Serializes the entry with its envelope, ready to append.
    ///
    /// # Errors
    ///
    /// Fails if the payload cannot be encoded.
    pub fn encode_record(&self) -> TxnResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| TxnError::protocol("journal entry exceeds 4 GiB"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&JOURNAL_MAGIC);
        data.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        // CRC32 over everything before it
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

struct Cursor<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> TxnResult<&'a [u8]> {
        if self.pos + n > self.payload.len() {
            return Err(TxnError::journal_corruption("unexpected end of entry payload"));
        }
        let slice = &self.payload[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u64(&mut self) -> TxnResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| TxnError::journal_corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_u32(&mut self) -> TxnResult<u32> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| TxnError::journal_corruption("invalid u32"))?;
        Ok(u32::from_le_bytes(bytes))
    }
}

/// Computes the CRC32 (IEEE) checksum of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
