//! Classification of node-reported submission errors
//!
//! Ledger nodes only report conditions such as "nonce too low" as free text.
//! The table below maps known messages to a closed set of classes; extend the
//! table, not the callers, when a node reports something new.

use crate::error::TxError;

use lazy_static::lazy_static;
use regex::Regex;

/// How the submission engine should react to a node error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The nonce was already used
    NonceTooLow,
    /// A transaction with the same nonce pays more
    FeeTooLow,
    /// The exact payload is already queued
    AlreadyKnown,
    Other,
}

enum Pattern {
    /// Case-insensitive substring
    Literal(&'static str),
    Regex(Regex),
}

impl Pattern {
    fn matches(&self, message: &str, lowercase: &str) -> bool {
        match self {
            Pattern::Literal(text) => lowercase.contains(&text.to_lowercase()),
            Pattern::Regex(re) => re.is_match(message),
        }
    }
}

lazy_static! {
    static ref ERROR_TABLE: Vec<(ErrorClass, Vec<Pattern>)> = vec![
        (
            ErrorClass::NonceTooLow,
            vec![
                Pattern::Literal("Transaction nonce is too low. Try incrementing the nonce."),
                Pattern::Literal("nonce too low"),
                Pattern::Literal("nonce has already been used"),
            ],
        ),
        (
            ErrorClass::FeeTooLow,
            vec![
                Pattern::Literal(
                    "Transaction gas price supplied is too low. There is another transaction with same nonce in the queue. Try increasing the gas price or incrementing the nonce."
                ),
                Pattern::Literal("replacement transaction underpriced"),
                Pattern::Literal("transaction underpriced"),
                Pattern::Regex(
                    Regex::new(
                        r"Transaction gas price \d+wei is too low\. There is another transaction with same nonce in the queue with gas price: \d+wei\. Try increasing the gas price or incrementing the nonce\."
                    )
                    .expect("valid regex"),
                ),
            ],
        ),
        (
            ErrorClass::AlreadyKnown,
            vec![
                Pattern::Literal("Transaction with the same hash was already imported."),
                Pattern::Literal("already known"),
            ],
        ),
    ];
}

/// Classify a raw node error message
pub fn classify(message: &str) -> ErrorClass {
    let lowercase = message.to_lowercase();

    ERROR_TABLE
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| p.matches(message, &lowercase)))
        .map(|(class, _)| *class)
        .unwrap_or(ErrorClass::Other)
}

/// Classify an error; only node-reported errors can be recoverable
pub fn classify_error(error: &TxError) -> ErrorClass {
    error.rpc_message().map(classify).unwrap_or(ErrorClass::Other)
}
