// One deterministic binary codec for everything that leaves memory:
// stored blocks, the wallet file, and wire messages all go through here.
use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};

/// Serialize data using bincode with the standard configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| BlockchainError::Corrupt(format!("Serialization failed: {e}")))
}

/// Deserialize data using bincode with the standard configuration
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    let (data, _) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| BlockchainError::Corrupt(format!("Deserialization failed: {e}")))?;
    Ok(data)
}

/// Encode one value onto a stream (wire framing)
pub fn encode_into_writer<T: Serialize + bincode::Encode, W: std::io::Write>(
    data: &T,
    writer: &mut W,
) -> Result<()> {
    let config = bincode::config::standard();
    bincode::encode_into_std_write(data, writer, config)
        .map_err(|e| BlockchainError::Transport(format!("Encode failed: {e}")))?;
    Ok(())
}

/// Decode exactly one value from a stream (wire framing)
pub fn decode_from_reader<T, R: std::io::Read>(reader: &mut R) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard();
    bincode::decode_from_std_read(reader, config)
        .map_err(|e| BlockchainError::Transport(format!("Decode failed: {e}")))
}
