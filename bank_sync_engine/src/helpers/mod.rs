mod credential_cipher;
mod name_similarity;
mod reference_text;

pub use credential_cipher::{CipherError, CredentialCipher};
pub use name_similarity::name_similarity;
pub use reference_text::{normalize_reference, reference_words, strip_leading_zeros};
