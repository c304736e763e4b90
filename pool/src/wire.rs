//! Envelope codec and the framed stream protocol spoken to orderers.
//!
//! The pool treats transactions as opaque byte strings; only two places look
//! inside them. Fee extraction reads the envelope header to price a
//! transaction, and the orderer client re-decodes before broadcast so a
//! corrupt blob fails locally instead of at the orderer.
//!
//! ## Envelope layout
//!
//! Length-prefixed binary, no self-description:
//!
//! ```text
//! envelope := u32 payload_len | payload | u32 sig_len | signature
//! payload  := u16 txid_len | txid (utf-8) | u64 fee (BE) | u32 data_len | data
//! ```
//!
//! ## Stream framing
//!
//! Every message on an orderer stream is one frame:
//!
//! ```text
//! frame := magic (4) | type (1) | u32 body_len (BE) | body
//! ```
//!
//! Frame type `0` carries an envelope, type `1` carries a 4-byte ack status.
//! Status 200 is SUCCESS; anything else fails the broadcast.

use num::BigUint;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::MAX_FRAME_BYTES;
use crate::mempool::{tx_key, FeeExtractor};

/// Preamble bytes on every stream frame. Lets an orderer reject stray
/// traffic without parsing further.
pub const STREAM_MAGIC: [u8; 4] = *b"ALSP";

/// Frame carrying an encoded envelope.
pub const FRAME_ENVELOPE: u8 = 0;

/// Frame carrying an acknowledgement status.
pub const FRAME_ACK: u8 = 1;

/// Ack status for an accepted envelope.
pub const STATUS_SUCCESS: u32 = 200;

/// Ack status for an envelope the orderer could not parse.
pub const STATUS_BAD_REQUEST: u32 = 400;

/// Ack status for an orderer that is shutting down or overloaded.
pub const STATUS_SERVICE_UNAVAILABLE: u32 = 503;

/// Errors raised while encoding or decoding wire structures.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ended before a declared length was satisfied.
    #[error("truncated input: needed {needed} more bytes")]
    Truncated {
        /// Bytes missing at the point of failure.
        needed: usize,
    },

    /// A declared length exceeds the frame bound.
    #[error("declared length {got} exceeds limit {max}")]
    Oversized {
        /// Declared length.
        got: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Trailing bytes after a complete decode.
    #[error("{0} trailing bytes after envelope")]
    TrailingBytes(usize),

    /// The transaction id was not valid UTF-8.
    #[error("transaction id is not utf-8")]
    BadTxId,

    /// A stream frame did not start with [`STREAM_MAGIC`].
    #[error("bad frame magic")]
    BadMagic,

    /// A stream frame carried an unknown type byte.
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),
}

// ---------------------------------------------------------------------------
// Envelope / Payload
// ---------------------------------------------------------------------------

/// A signed transaction envelope as submitted by endorsing clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Encoded [`Payload`] bytes.
    pub payload: Vec<u8>,
    /// Signature over the payload. Opaque to the pool; may be empty for
    /// test traffic.
    pub signature: Vec<u8>,
}

/// The priced interior of an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Client-assigned transaction id.
    pub tx_id: String,
    /// Fee offered for ordering, in the ledger's smallest unit.
    pub fee: u64,
    /// Chaincode invocation bytes. Opaque here.
    pub data: Vec<u8>,
}

impl Payload {
    /// Encodes the payload into its length-prefixed form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.tx_id.len() + 8 + 4 + self.data.len());
        out.extend_from_slice(&(self.tx_id.len() as u16).to_be_bytes());
        out.extend_from_slice(self.tx_id.as_bytes());
        out.extend_from_slice(&self.fee.to_be_bytes());
        out.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Decodes a payload, rejecting truncated or oversized input.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let txid_len = r.u16()? as usize;
        let txid_bytes = r.bytes(txid_len)?;
        let tx_id = std::str::from_utf8(txid_bytes)
            .map_err(|_| WireError::BadTxId)?
            .to_string();
        let fee = r.u64()?;
        let data_len = r.u32()? as usize;
        if data_len > MAX_FRAME_BYTES {
            return Err(WireError::Oversized {
                got: data_len,
                max: MAX_FRAME_BYTES,
            });
        }
        let data = r.bytes(data_len)?.to_vec();
        Ok(Self { tx_id, fee, data })
    }
}

impl Envelope {
    /// Wraps a payload with a signature.
    pub fn new(payload: &Payload, signature: Vec<u8>) -> Self {
        Self {
            payload: payload.encode(),
            signature,
        }
    }

    /// Encodes the envelope into its length-prefixed form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.payload.len() + 4 + self.signature.len());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&(self.signature.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    /// Decodes an envelope from a full transaction blob. The whole buffer
    /// must be consumed; trailing bytes are an error.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(buf);
        let payload_len = r.u32()? as usize;
        if payload_len > MAX_FRAME_BYTES {
            return Err(WireError::Oversized {
                got: payload_len,
                max: MAX_FRAME_BYTES,
            });
        }
        let payload = r.bytes(payload_len)?.to_vec();
        let sig_len = r.u32()? as usize;
        if sig_len > MAX_FRAME_BYTES {
            return Err(WireError::Oversized {
                got: sig_len,
                max: MAX_FRAME_BYTES,
            });
        }
        let signature = r.bytes(sig_len)?.to_vec();
        if r.remaining() != 0 {
            return Err(WireError::TrailingBytes(r.remaining()));
        }
        Ok(Self { payload, signature })
    }

    /// Decodes the interior payload.
    pub fn payload(&self) -> Result<Payload, WireError> {
        Payload::decode(&self.payload)
    }
}

/// Cursor over a byte slice with bounds-checked reads.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                needed: n - self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        let b = self.bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }
}

// ---------------------------------------------------------------------------
// Stream framing
// ---------------------------------------------------------------------------

/// Writes one frame to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    frame_type: u8,
    body: &[u8],
) -> std::io::Result<()> {
    let mut header = [0u8; 9];
    header[..4].copy_from_slice(&STREAM_MAGIC);
    header[4] = frame_type;
    header[5..9].copy_from_slice(&(body.len() as u32).to_be_bytes());
    w.write_all(&header).await?;
    w.write_all(body).await?;
    w.flush().await
}

/// Reads one frame from the stream, returning its type and body.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 9];
    r.read_exact(&mut header).await?;
    if header[..4] != STREAM_MAGIC {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            WireError::BadMagic,
        ));
    }
    let frame_type = header[4];
    if frame_type != FRAME_ENVELOPE && frame_type != FRAME_ACK {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            WireError::UnknownFrameType(frame_type),
        ));
    }
    let len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            WireError::Oversized {
                got: len,
                max: MAX_FRAME_BYTES,
            },
        ));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await?;
    Ok((frame_type, body))
}

/// Encodes an ack body for the given status.
pub fn ack_body(status: u32) -> [u8; 4] {
    status.to_be_bytes()
}

/// Decodes an ack body into its status.
pub fn ack_status(body: &[u8]) -> Result<u32, WireError> {
    if body.len() != 4 {
        return Err(WireError::Truncated {
            needed: 4usize.saturating_sub(body.len()),
        });
    }
    Ok(u32::from_be_bytes([body[0], body[1], body[2], body[3]]))
}

// ---------------------------------------------------------------------------
// Fee extraction
// ---------------------------------------------------------------------------

/// [`FeeExtractor`] over the envelope codec.
///
/// Decode failures are not fatal to admission: the pool downgrades the fee
/// to zero and falls back to the fingerprint as the transaction id.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeFeeExtractor;

impl FeeExtractor for EnvelopeFeeExtractor {
    fn fee_and_id(&self, tx: &[u8]) -> Result<(BigUint, String), WireError> {
        let payload = Envelope::decode(tx)?.payload()?;
        let tx_id = if payload.tx_id.is_empty() {
            hex::encode(tx_key(tx))
        } else {
            payload.tx_id
        };
        Ok((BigUint::from(payload.fee), tx_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope(fee: u64) -> Envelope {
        let payload = Payload {
            tx_id: format!("tx-{fee}"),
            fee,
            data: b"invoke:transfer".to_vec(),
        };
        Envelope::new(&payload, vec![0xAB; 16])
    }

    #[test]
    fn envelope_roundtrip() {
        let env = sample_envelope(42);
        let decoded = Envelope::decode(&env.encode()).unwrap();
        assert_eq!(decoded, env);
        let payload = decoded.payload().unwrap();
        assert_eq!(payload.fee, 42);
        assert_eq!(payload.tx_id, "tx-42");
    }

    #[test]
    fn envelope_rejects_truncation() {
        let bytes = sample_envelope(7).encode();
        for cut in [0, 3, bytes.len() / 2, bytes.len() - 1] {
            assert!(Envelope::decode(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn envelope_rejects_trailing_bytes() {
        let mut bytes = sample_envelope(7).encode();
        bytes.push(0);
        assert!(matches!(
            Envelope::decode(&bytes),
            Err(WireError::TrailingBytes(1))
        ));
    }

    #[test]
    fn payload_rejects_bad_utf8_txid() {
        let mut bytes = Payload {
            tx_id: "ab".into(),
            fee: 1,
            data: vec![],
        }
        .encode();
        bytes[2] = 0xFF;
        bytes[3] = 0xFE;
        assert!(matches!(Payload::decode(&bytes), Err(WireError::BadTxId)));
    }

    #[test]
    fn fee_extractor_reads_fee_and_id() {
        let env = sample_envelope(99);
        let (fee, tx_id) = EnvelopeFeeExtractor.fee_and_id(&env.encode()).unwrap();
        assert_eq!(fee, BigUint::from(99u64));
        assert_eq!(tx_id, "tx-99");
    }

    #[test]
    fn fee_extractor_rejects_garbage() {
        assert!(EnvelopeFeeExtractor.fee_and_id(b"not an envelope").is_err());
    }

    #[test]
    fn ack_body_roundtrip() {
        assert_eq!(ack_status(&ack_body(STATUS_SUCCESS)).unwrap(), STATUS_SUCCESS);
        assert_eq!(ack_status(&ack_body(503)).unwrap(), 503);
        assert!(ack_status(&[0, 1]).is_err());
    }

    #[tokio::test]
    async fn frame_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let body = sample_envelope(5).encode();
        write_frame(&mut a, FRAME_ENVELOPE, &body).await.unwrap();
        let (frame_type, got) = read_frame(&mut b).await.unwrap();
        assert_eq!(frame_type, FRAME_ENVELOPE);
        assert_eq!(got, body);
    }

    #[tokio::test]
    async fn frame_rejects_bad_magic() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(b"XXXX\x00\x00\x00\x00\x00").await.unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }
}
