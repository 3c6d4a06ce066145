/// Backend table holding one published public key per user.
pub const USER_PUBLIC_KEYS_TABLE: &str = "user_public_keys";
/// Backend table holding encrypted direct messages.
pub const MESSAGES_TABLE: &str = "messages";
/// Fixed name of the local keypair record in a device key store.
pub const KEYPAIR_ENTRY_NAME: &str = "e2ee_keypair";
/// Maximum size for a single plaintext message body in bytes.
pub const MAX_MESSAGE_SIZE_BYTES: usize = 8 * 1024;
/// Text shown in place of a message body that could not be decrypted.
pub const UNDECRYPTABLE_PLACEHOLDER: &str = "could not decrypt message";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_distinct() {
        assert_ne!(USER_PUBLIC_KEYS_TABLE, MESSAGES_TABLE);
    }

    #[test]
    fn all_length_constants_positive() {
        assert!(MAX_MESSAGE_SIZE_BYTES > 0);
        assert!(!KEYPAIR_ENTRY_NAME.is_empty());
        assert!(!UNDECRYPTABLE_PLACEHOLDER.is_empty());
    }
}
