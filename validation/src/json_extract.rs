//! Tolerant JSON extraction from an LLM completion: the model is asked
//! for JSON but often wraps it in a fenced code block or prose, so every
//! parse site here looks for a ` ```json ` fence before falling back to
//! the raw text.

pub fn extract_json_block(content: &str) -> &str {
    if let Some(start) = content.find("```json") {
        let body_start = start + "```json".len();
        if let Some(end) = content[body_start..].find("```") {
            return content[body_start..body_start + end].trim();
        }
    }
    if let Some(start) = content.find("```") {
        let body_start = start + "```".len();
        if let Some(end) = content[body_start..].find("```") {
            return content[body_start..body_start + end].trim();
        }
    }
    content.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_json_fence() {
        let content = "here you go\n```json\n{\"a\":1}\n```\nthanks";
        assert_eq!(extract_json_block(content), "{\"a\":1}");
    }

    #[test]
    fn extracts_from_bare_fence() {
        let content = "```\n{\"a\":1}\n```";
        assert_eq!(extract_json_block(content), "{\"a\":1}");
    }

    #[test]
    fn falls_back_to_raw_content() {
        assert_eq!(extract_json_block("  {\"a\":1}  "), "{\"a\":1}");
    }
}
