//! Size checks for item content.

use crate::chunk::{HEADER_LEN, MAX_BODY_LEN};
use crate::error::ValidationError;
use crate::record::TodoContent;

/// Number of integer fields in the largest record form (id, priority, revision).
const INT_FIELDS: usize = 3;
/// Number of text fields.
const TEXT_FIELDS: usize = 4;

/// Body size of the largest record chunk `content` can appear in.
pub fn encoded_record_size(content: &TodoContent) -> usize {
    let text = content.title.len()
        + content.deadline.len()
        + content.status.len()
        + content.description.len();
    (INT_FIELDS + TEXT_FIELDS) * HEADER_LEN + INT_FIELDS * 4 + text
}

/// Check that `content` fits in a single record chunk.
pub fn validate_content(content: &TodoContent) -> Result<(), ValidationError> {
    let size = encoded_record_size(content);
    if size > MAX_BODY_LEN {
        return Err(ValidationError::RecordTooLarge {
            size,
            limit: MAX_BODY_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemId, Revision};
    use crate::wire::encode_snapshot;
    use crate::TodoRecord;

    #[test]
    fn test_size_matches_encoding() {
        let content = TodoContent::new("title", "2024-01-01", 3, "open", "some text");
        let record = TodoRecord::new(ItemId(1), content.clone(), Revision::Synced(2));
        let buf = encode_snapshot(&[record]).unwrap();
        assert_eq!(buf.len(), HEADER_LEN + encoded_record_size(&content));
    }

    #[test]
    fn test_rejects_oversized_description() {
        let mut content = TodoContent::default();
        content.description = "x".repeat(MAX_BODY_LEN);
        assert!(matches!(
            validate_content(&content),
            Err(ValidationError::RecordTooLarge { .. })
        ));

        content.description = "x".repeat(MAX_BODY_LEN - encoded_record_size(&TodoContent::default()));
        assert!(validate_content(&content).is_ok());
    }
}
