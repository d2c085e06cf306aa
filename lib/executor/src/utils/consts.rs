pub const TYPENAME_FIELD_NAME: &str = "__typename";
/// Response key of the root field of a merge request.
pub const ENTITY_RESPONSE_KEY: &str = "_entity";
/// Prefix of the variables carrying merge keys.
pub const KEY_VARIABLE_PREFIX: &str = "_key_";
/// Prefix of the aliases of key fields added to outbound requests.
pub const KEY_ALIAS_PREFIX: &str = "_key_";
