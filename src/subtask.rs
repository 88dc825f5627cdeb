//! Registration descriptor read by the pipeline scheduler.

/// Static description of a pipeline subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubtaskMeta {
    pub name: &'static str,
    pub enabled_by_default: bool,
    pub description: &'static str,
    pub domain_types: &'static [&'static str],
}

pub const DOMAIN_TYPE_TICKET: &str = "TICKET";

pub const ENRICH_STORY_CUSTOM_FIELDS: SubtaskMeta = SubtaskMeta {
    name: "enrichStoryCustomFields",
    enabled_by_default: true,
    description: "Enrich story custom fields",
    domain_types: &[DOMAIN_TYPE_TICKET],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_custom_fields_meta() {
        assert_eq!(ENRICH_STORY_CUSTOM_FIELDS.name, "enrichStoryCustomFields");
        assert!(ENRICH_STORY_CUSTOM_FIELDS.enabled_by_default);
        assert_eq!(ENRICH_STORY_CUSTOM_FIELDS.domain_types, &["TICKET"]);
    }
}
