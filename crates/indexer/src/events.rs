//! Commitment event decoding
//!
//! Turns the program's log lines into [`CommitmentRecord`]s. Events are
//! emitted as `Program data: <base64>` lines whose payload starts with an
//! 8-byte discriminator selecting one of two layouts:
//!
//! ```text
//! base asset:  [disc 8][leaf_index u64 LE][commitment 32][len u32 LE][ciphertext len]
//! token asset: [disc 8][leaf_index u64 LE][mint 32][commitment 32][len u32 LE][ciphertext len]
//! ```

use base64::{engine::general_purpose, Engine as _};
use pool_common::{CommitmentRecord, Error, FieldElement, Network, Result, Token};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

/// Event emitted when a base-asset commitment is appended.
pub const BASE_EVENT_NAME: &str = "CommitmentData";

/// Event emitted when a token-asset commitment is appended.
pub const TOKEN_EVENT_NAME: &str = "SplCommitmentData";

const PROGRAM_DATA_PREFIX: &str = "Program data: ";

const DISCRIMINATOR_LEN: usize = 8;
const BASE_HEADER_LEN: usize = DISCRIMINATOR_LEN + 8 + 32 + 4;
const TOKEN_HEADER_LEN: usize = DISCRIMINATOR_LEN + 8 + 32 + 32 + 4;

/// `sha256("event:<name>")[..8]`
pub fn event_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("event:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

/// A decoded commitment-creation event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitmentEvent {
    Base {
        leaf_index: u64,
        commitment: FieldElement,
        encrypted_output: Vec<u8>,
    },
    Token {
        leaf_index: u64,
        mint: Pubkey,
        commitment: FieldElement,
        encrypted_output: Vec<u8>,
    },
}

impl CommitmentEvent {
    pub fn leaf_index(&self) -> u64 {
        match self {
            CommitmentEvent::Base { leaf_index, .. } | CommitmentEvent::Token { leaf_index, .. } => {
                *leaf_index
            }
        }
    }

    pub fn commitment(&self) -> &FieldElement {
        match self {
            CommitmentEvent::Base { commitment, .. } | CommitmentEvent::Token { commitment, .. } => {
                commitment
            }
        }
    }

    /// Normalize into an index row, resolving the mint against `network`.
    pub fn into_record(self, network: Network, signature: Option<&str>) -> CommitmentRecord {
        let record = match self {
            CommitmentEvent::Base {
                leaf_index,
                commitment,
                encrypted_output,
            } => CommitmentRecord::new(Token::Sol, leaf_index, &commitment, &encrypted_output, None),
            CommitmentEvent::Token {
                leaf_index,
                mint,
                commitment,
                encrypted_output,
            } => {
                let mint = mint.to_string();
                let token = Token::from_mint(network, &mint);
                if token.is_base() {
                    debug!("Mint {} not in {} table, indexing as {}", mint, network, token);
                }
                CommitmentRecord::new(token, leaf_index, &commitment, &encrypted_output, Some(mint))
            }
        };

        match signature {
            Some(sig) => record.with_signature(sig),
            None => record,
        }
    }
}

/// Event decoder with precomputed discriminators
#[derive(Debug, Clone)]
pub struct EventDecoder {
    base_discriminator: [u8; 8],
    token_discriminator: [u8; 8],
    network: Network,

    /// When set, only data lines emitted while this program is executing are
    /// accepted; lines from other programs in the same transaction are ignored.
    program_id: Option<Pubkey>,
}

impl EventDecoder {
    pub fn new(network: Network, program_id: Option<Pubkey>) -> Self {
        Self {
            base_discriminator: event_discriminator(BASE_EVENT_NAME),
            token_discriminator: event_discriminator(TOKEN_EVENT_NAME),
            network,
            program_id,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Decode a raw event payload (discriminator included).
    pub fn decode_payload(&self, data: &[u8]) -> Result<CommitmentEvent> {
        let Some(disc) = data.get(..DISCRIMINATOR_LEN) else {
            return Err(Error::UnrecognizedDiscriminator(hex::encode(data)));
        };

        if disc == self.base_discriminator {
            decode_base(data)
        } else if disc == self.token_discriminator {
            decode_token(data)
        } else {
            Err(Error::UnrecognizedDiscriminator(hex::encode(disc)))
        }
    }

    /// Decode a single log line.
    ///
    /// Returns `Ok(None)` for lines that are not event data at all.
    pub fn decode_line(&self, line: &str) -> Result<Option<CommitmentEvent>> {
        let Some(encoded) = line.strip_prefix(PROGRAM_DATA_PREFIX) else {
            return Ok(None);
        };

        let data = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::UnrecognizedDiscriminator(format!("undecodable payload: {e}")))?;

        self.decode_payload(&data).map(Some)
    }

    /// Decode every commitment event in a transaction's logs.
    ///
    /// Malformed and unrecognized payloads are skipped; decoding always
    /// continues with the next line.
    pub fn decode_logs(&self, logs: &[String], signature: Option<&str>) -> Vec<CommitmentRecord> {
        let mut records = Vec::new();
        let mut invocations = InvocationStack::default();

        for line in logs {
            invocations.observe(line);

            if let Some(program_id) = &self.program_id {
                if !invocations.is_current(program_id) {
                    continue;
                }
            }

            match self.decode_line(line) {
                Ok(Some(event)) => records.push(event.into_record(self.network, signature)),
                Ok(None) => {}
                Err(Error::UnrecognizedDiscriminator(disc)) => {
                    debug!("Ignoring non-commitment event {} in {:?}", disc, signature);
                }
                Err(e) => {
                    warn!("Skipping log line in {:?}: {}", signature, e);
                }
            }
        }

        debug!(
            "Decoded {} commitment(s) from {} log line(s) in {:?}",
            records.len(),
            logs.len(),
            signature
        );

        records
    }
}

fn decode_base(data: &[u8]) -> Result<CommitmentEvent> {
    if data.len() < BASE_HEADER_LEN {
        return Err(too_short(BASE_EVENT_NAME, BASE_HEADER_LEN, data.len()));
    }

    let mut cursor = DISCRIMINATOR_LEN;
    let leaf_index = read_u64(data, &mut cursor);
    let commitment = read_field(data, &mut cursor)?;
    let encrypted_output = read_ciphertext(data, &mut cursor, BASE_EVENT_NAME)?;

    Ok(CommitmentEvent::Base {
        leaf_index,
        commitment,
        encrypted_output,
    })
}

fn decode_token(data: &[u8]) -> Result<CommitmentEvent> {
    if data.len() < TOKEN_HEADER_LEN {
        return Err(too_short(TOKEN_EVENT_NAME, TOKEN_HEADER_LEN, data.len()));
    }

    let mut cursor = DISCRIMINATOR_LEN;
    let leaf_index = read_u64(data, &mut cursor);
    let mint = Pubkey::new_from_array(read_array32(data, &mut cursor));
    let commitment = read_field(data, &mut cursor)?;
    let encrypted_output = read_ciphertext(data, &mut cursor, TOKEN_EVENT_NAME)?;

    Ok(CommitmentEvent::Token {
        leaf_index,
        mint,
        commitment,
        encrypted_output,
    })
}

// The readers below assume the caller already checked the fixed header length.

fn read_array32(data: &[u8], cursor: &mut usize) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&data[*cursor..*cursor + 32]);
    *cursor += 32;
    out
}

fn read_u64(data: &[u8], cursor: &mut usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&data[*cursor..*cursor + 8]);
    *cursor += 8;
    u64::from_le_bytes(out)
}

fn read_field(data: &[u8], cursor: &mut usize) -> Result<FieldElement> {
    let value = FieldElement::new(read_array32(data, cursor));
    if !value.is_canonical() {
        return Err(Error::MalformedEventRecord(format!(
            "commitment {} is not a field element",
            value.to_hex()
        )));
    }
    Ok(value)
}

fn read_ciphertext(data: &[u8], cursor: &mut usize, event: &str) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&data[*cursor..*cursor + 4]);
    *cursor += 4;
    let len = u32::from_le_bytes(len_bytes) as usize;

    let end = cursor.checked_add(len).filter(|end| *end <= data.len()).ok_or_else(|| {
        Error::MalformedEventRecord(format!(
            "{event}: ciphertext length {len} overruns {} byte payload",
            data.len()
        ))
    })?;

    let out = data[*cursor..end].to_vec();
    *cursor = end;
    Ok(out)
}

fn too_short(event: &str, needed: usize, actual: usize) -> Error {
    Error::MalformedEventRecord(format!(
        "{event}: payload is {actual} bytes, need at least {needed}"
    ))
}

/// Tracks which program is executing while walking a transaction's logs.
#[derive(Default)]
struct InvocationStack {
    programs: Vec<String>,
}

impl InvocationStack {
    fn observe(&mut self, line: &str) {
        let Some(rest) = line.strip_prefix("Program ") else {
            return;
        };
        let mut parts = rest.split_whitespace();
        let (Some(program), Some(action)) = (parts.next(), parts.next()) else {
            return;
        };

        match action {
            "invoke" => self.programs.push(program.to_string()),
            "success" | "failed" => {
                if self.programs.last().map(String::as_str) == Some(program) {
                    self.programs.pop();
                }
            }
            _ => {}
        }
    }

    fn is_current(&self, program_id: &Pubkey) -> bool {
        self.programs
            .last()
            .is_some_and(|current| *current == program_id.to_string())
    }
}

/// Encode an event payload the way the program logs it. Used by the mock
/// chain and tests.
pub fn encode_event_line(event: &CommitmentEvent) -> String {
    let mut data = Vec::new();
    match event {
        CommitmentEvent::Base {
            leaf_index,
            commitment,
            encrypted_output,
        } => {
            data.extend_from_slice(&event_discriminator(BASE_EVENT_NAME));
            data.extend_from_slice(&leaf_index.to_le_bytes());
            data.extend_from_slice(commitment.as_bytes());
            data.extend_from_slice(&(encrypted_output.len() as u32).to_le_bytes());
            data.extend_from_slice(encrypted_output);
        }
        CommitmentEvent::Token {
            leaf_index,
            mint,
            commitment,
            encrypted_output,
        } => {
            data.extend_from_slice(&event_discriminator(TOKEN_EVENT_NAME));
            data.extend_from_slice(&leaf_index.to_le_bytes());
            data.extend_from_slice(mint.as_ref());
            data.extend_from_slice(commitment.as_bytes());
            data.extend_from_slice(&(encrypted_output.len() as u32).to_le_bytes());
            data.extend_from_slice(encrypted_output);
        }
    }
    format!("{PROGRAM_DATA_PREFIX}{}", general_purpose::STANDARD.encode(data))
}
