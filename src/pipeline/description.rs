//! Deterministic markdown description rendered from label attributes.

use crate::labeling::LabelAttributes;
use std::fmt::Write as _;

const MAX_ITEMS: usize = 3;
const UNKNOWN: &str = "Unknown";

/// Render the product description used for the description embedding.
///
/// Each list shows at most its first three entries joined by `", "`; an empty list renders as
/// `Unknown`. The same attributes always produce the same text.
pub fn render_description(labels: &LabelAttributes) -> String {
    let main_subject = format_list(&labels.main_subject);
    let product_type = format_list(&labels.product_type);
    let recipient = format_list(&labels.recipient);
    let occasion = format_list(&labels.occasion);
    let style = format_list(&labels.style);
    let color = format_list(&labels.color);
    let trademark = if labels.trademark_level.trim().is_empty() {
        UNKNOWN
    } else {
        labels.trademark_level.as_str()
    };

    let mut out = String::with_capacity(1024);
    out.push_str("# Product Description\n\n");

    out.push_str("## Basics\n");
    push_field(&mut out, "Main Subject", &main_subject);
    push_field(&mut out, "Product Type", &product_type);
    push_field(&mut out, "Trademark Level", trademark);

    out.push_str("\n## Audience & Purpose\n");
    push_field(&mut out, "Recipient", &recipient);
    push_field(&mut out, "Buyer", &format_list(&labels.audience));
    push_field(&mut out, "Usage Purpose", &format_list(&labels.purpose));
    push_field(&mut out, "Occasion", &occasion);

    out.push_str("\n## Classification\n");
    push_field(&mut out, "Niche/Theme", &format_list(&labels.theme));
    push_field(&mut out, "Tone", &format_list(&labels.tone));
    push_field(&mut out, "Message Type", &format_list(&labels.message_type));
    push_field(
        &mut out,
        "Personalization",
        &format_list(&labels.personalization),
    );
    push_field(&mut out, "Printed Text", &format_list(&labels.literal_text));

    out.push_str("\n## Design & Display\n");
    push_field(&mut out, "Display Context", &format_list(&labels.placement));
    push_field(&mut out, "Design Style", &style);
    push_field(&mut out, "Color Aesthetic", &color);

    out.push_str("\n## Summary\n");
    let _ = writeln!(
        out,
        "This {product_type} features {main_subject} designed for {recipient}, suited to \
         {occasion}, in a {style} style with {color} tones."
    );
    out
}

fn format_list(items: &[String]) -> String {
    let shown: Vec<&str> = items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .take(MAX_ITEMS)
        .collect();
    if shown.is_empty() {
        UNKNOWN.to_string()
    } else {
        shown.join(", ")
    }
}

fn push_field(out: &mut String, label: &str, value: &str) {
    let _ = writeln!(out, "- **{label}**: {value}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelAttributes {
        LabelAttributes {
            recipient: vec!["Dad".into()],
            product_type: vec!["Mug".into()],
            occasion: vec![
                "Father's Day".into(),
                "Birthday".into(),
                "Christmas".into(),
                "Retirement".into(),
            ],
            style: vec!["Vintage".into()],
            color: vec!["Blue".into(), "White".into()],
            main_subject: vec!["Fishing rod".into()],
            ..LabelAttributes::default()
        }
    }

    #[test]
    fn rendering_is_deterministic() {
        assert_eq!(render_description(&labels()), render_description(&labels()));
    }

    #[test]
    fn lists_are_capped_at_three_entries() {
        let text = render_description(&labels());
        assert!(text.contains("- **Occasion**: Father's Day, Birthday, Christmas\n"));
        assert!(!text.contains("Retirement"));
    }

    #[test]
    fn empty_lists_render_unknown() {
        let text = render_description(&labels());
        assert!(text.contains("- **Buyer**: Unknown\n"));
        assert!(text.contains("- **Trademark Level**: No TM\n"));
        assert!(text.starts_with("# Product Description\n"));
        assert!(text.contains(
            "This Mug features Fishing rod designed for Dad, suited to Father's Day, Birthday, \
             Christmas, in a Vintage style with Blue, White tones."
        ));
    }
}
