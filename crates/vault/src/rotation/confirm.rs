//! Operator confirmation gate for jobs that rewrite stored data.

use std::io::{BufRead, Write};

use super::RotationError;

/// Phrase the operator types before re-encrypting under a new key.
pub const ROTATE_PHRASE: &str = "rotate encryption keys";

/// Phrase the operator types before encrypting existing plaintext.
pub const ENCRYPT_PHRASE: &str = "encrypt existing data";

/// Proof that an operator confirmed a mutating run.
///
/// Only obtainable by supplying the expected phrase; a non-dry-run job will
/// not start without one.
#[derive(Debug)]
pub struct OperatorConfirmation {
    _private: (),
}

impl OperatorConfirmation {
    /// Accept `typed` if it equals `phrase` (surrounding whitespace ignored).
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::ConfirmationMismatch`] otherwise.
    pub fn from_phrase(phrase: &str, typed: &str) -> Result<Self, RotationError> {
        if typed.trim() == phrase {
            Ok(Self { _private: () })
        } else {
            Err(RotationError::ConfirmationMismatch)
        }
    }

    /// Prompt on `output` and read one line from `input`.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::ConfirmationMismatch`] on a wrong or empty
    /// answer and [`RotationError::Io`] if the terminal cannot be used.
    pub fn prompt<R: BufRead, W: Write>(
        phrase: &str,
        input: &mut R,
        output: &mut W,
    ) -> Result<Self, RotationError> {
        write!(output, "Type \"{phrase}\" to continue: ")?;
        output.flush()?;
        let mut line = String::new();
        input.read_line(&mut line)?;
        Self::from_phrase(phrase, &line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn exact_phrase_confirms() {
        assert!(OperatorConfirmation::from_phrase(ROTATE_PHRASE, "rotate encryption keys\n").is_ok());
        assert!(matches!(
            OperatorConfirmation::from_phrase(ROTATE_PHRASE, "yes"),
            Err(RotationError::ConfirmationMismatch)
        ));
        assert!(OperatorConfirmation::from_phrase(ENCRYPT_PHRASE, "ENCRYPT EXISTING DATA").is_err());
    }

    #[test]
    fn prompt_reads_one_line() {
        let mut input = Cursor::new(b"encrypt existing data\nignored\n".to_vec());
        let mut output = Vec::new();
        OperatorConfirmation::prompt(ENCRYPT_PHRASE, &mut input, &mut output).unwrap();
        assert!(String::from_utf8(output).unwrap().contains(ENCRYPT_PHRASE));

        let mut empty = Cursor::new(Vec::new());
        assert!(OperatorConfirmation::prompt(ENCRYPT_PHRASE, &mut empty, &mut Vec::new()).is_err());
    }
}
