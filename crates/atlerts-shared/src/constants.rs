/// Application name
pub const APP_NAME: &str = "Atlerts";

/// Joins the two sorted identities of a direct conversation id
pub const CONVERSATION_SEPARATOR: char = '_';

/// Collection layout
pub const CONVERSATIONS_COLLECTION: &str = "conversations";
pub const MESSAGES_COLLECTION: &str = "messages";
pub const BROADCASTS_COLLECTION: &str = "broadcasts";
pub const REPLIES_COLLECTION: &str = "replies";
pub const USERS_COLLECTION: &str = "users";

/// Message fields
pub const FIELD_CONVERSATION_ID: &str = "conversationId";
pub const FIELD_FROM_ID: &str = "fromId";
pub const FIELD_TO_ID: &str = "toId";
pub const FIELD_SENT_AT: &str = "sentAt";
pub const FIELD_IS_READ: &str = "isRead";
pub const FIELD_ATTACHMENT_URL: &str = "attachmentUrl";

/// Field names written by older clients, accepted on read only
pub const LEGACY_FIELD_SENDER_ID: &str = "senderId";
pub const LEGACY_FIELD_TIMESTAMP: &str = "timestamp";
pub const LEGACY_FIELD_IMAGE_URL: &str = "imageURL";
pub const LEGACY_FIELD_IMAGE_URL_LOWER: &str = "imageUrl";

/// Broadcast fields
pub const FIELD_READ_BY: &str = "readBy";

/// User profile fields
pub const FIELD_UID: &str = "uid";
pub const FIELD_NAME: &str = "name";

/// Most recent broadcasts kept live in the feed
pub const DEFAULT_BROADCAST_FEED_LIMIT: usize = 50;

/// Profiles fetched for a read-receipt listing
pub const DEFAULT_RECEIPT_LOOKUP_LIMIT: usize = 10;

/// Identity that receives helpdesk messages
pub const DEFAULT_SUPPORT_AGENT_ID: &str = "helpdesk";
