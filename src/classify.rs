//! Pure classification of transfer logs into mint/burn events.
//!
//! No I/O happens here; the functions operate on raw log bytes so they are
//! testable without a node.

use crate::chain::RawLogEntry;
use crate::error::LogDecodeError;
use alloy::primitives::{Address, B256, U256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Mint,
    Burn,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Mint => "mint",
            EventKind::Burn => "burn",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "mint" => Some(Self::Mint),
            "burn" => Some(Self::Burn),
            _ => None,
        }
    }
}

/// A transfer log that survived classification. `amount` is the raw token
/// quantity, unscaled; rendering applies the configured decimal count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedEvent {
    pub kind: EventKind,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub tx_hash: B256,
    pub block_number: u64,
}

/// Classify a raw transfer log. `Ok(None)` means a plain wallet-to-wallet
/// transfer, which the indexer does not persist.
///
/// The token standard encodes `from`/`to` as the second and third indexed
/// topics (address in the lower 20 bytes of the word) and the amount as a
/// single unsigned word in the data payload.
pub fn classify_transfer(
    log: &RawLogEntry,
) -> std::result::Result<Option<ClassifiedEvent>, LogDecodeError> {
    if log.topics.len() < 3 {
        return Err(LogDecodeError(format!(
            "expected 3 indexed topics, got {}",
            log.topics.len()
        )));
    }
    if log.data.len() != 32 {
        return Err(LogDecodeError(format!(
            "expected 32-byte amount payload, got {} bytes",
            log.data.len()
        )));
    }

    let from = Address::from_word(log.topics[1]);
    let to = Address::from_word(log.topics[2]);
    let amount = U256::from_be_slice(&log.data);

    let kind = if from == Address::ZERO {
        EventKind::Mint
    } else if to == Address::ZERO {
        EventKind::Burn
    } else {
        return Ok(None);
    };

    Ok(Some(ClassifiedEvent {
        kind,
        from,
        to,
        amount,
        tx_hash: log.tx_hash,
        block_number: log.block_number,
    }))
}

/// Render a raw token quantity as a decimal string, e.g. 1500000000000000000
/// with 18 decimals becomes "1.5". Trailing fractional zeros are trimmed.
pub fn format_token_amount(raw: U256, decimals: u8) -> String {
    if decimals == 0 {
        return raw.to_string();
    }
    let scale = U256::from(10u64).pow(U256::from(decimals as u64));
    let whole = raw / scale;
    let frac = raw % scale;
    if frac.is_zero() {
        return whole.to_string();
    }
    let frac_str = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::{classify_transfer, format_token_amount, EventKind};
    use crate::chain::{transfer_topic, RawLogEntry};
    use alloy::primitives::{Address, B256, U256};

    fn transfer_log(from: Address, to: Address, amount: U256) -> RawLogEntry {
        RawLogEntry {
            tx_hash: B256::from([0x11; 32]),
            block_number: 42,
            log_index: 0,
            topics: vec![transfer_topic(), from.into_word(), to.into_word()],
            data: B256::from(amount).to_vec(),
        }
    }

    #[test]
    fn zero_from_classifies_as_mint() {
        let to = Address::from([0xaa; 20]);
        let log = transfer_log(Address::ZERO, to, U256::from(5u64));
        let event = classify_transfer(&log).expect("decode").expect("classified");
        assert_eq!(event.kind, EventKind::Mint);
        assert_eq!(event.to, to);
        assert_eq!(event.amount, U256::from(5u64));
        assert_eq!(event.block_number, 42);
    }

    #[test]
    fn zero_to_classifies_as_burn() {
        let from = Address::from([0xbb; 20]);
        let log = transfer_log(from, Address::ZERO, U256::from(9u64));
        let event = classify_transfer(&log).expect("decode").expect("classified");
        assert_eq!(event.kind, EventKind::Burn);
        assert_eq!(event.from, from);
    }

    #[test]
    fn plain_transfer_is_discarded() {
        let log = transfer_log(
            Address::from([0xaa; 20]),
            Address::from([0xbb; 20]),
            U256::from(1u64),
        );
        assert!(classify_transfer(&log).expect("decode").is_none());
    }

    #[test]
    fn missing_topics_fail_to_decode() {
        let mut log = transfer_log(Address::ZERO, Address::from([0xcc; 20]), U256::from(1u64));
        log.topics.truncate(2);
        let err = classify_transfer(&log).expect_err("should fail");
        assert!(err.to_string().contains("topics"));
    }

    #[test]
    fn short_data_fails_to_decode() {
        let mut log = transfer_log(Address::ZERO, Address::from([0xcc; 20]), U256::from(1u64));
        log.data.truncate(8);
        assert!(classify_transfer(&log).is_err());
    }

    #[test]
    fn amount_formatting_scales_and_trims() {
        let one_and_a_half = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(format_token_amount(one_and_a_half, 18), "1.5");
        assert_eq!(format_token_amount(U256::ZERO, 18), "0");
        assert_eq!(format_token_amount(U256::from(1u64), 18), "0.000000000000000001");
        assert_eq!(format_token_amount(U256::from(250u64), 0), "250");
        let whole = U256::from(7u64) * U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(format_token_amount(whole, 18), "7");
    }
}
