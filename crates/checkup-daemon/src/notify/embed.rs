use checkup_core::models::Update;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::OwnedFormatItem;

// https://discord.com/developers/docs/resources/message#embed-object-embed-limits
pub const MAX_TITLE: usize = 256;
pub const MAX_DESCRIPTION: usize = 2048;
pub const MAX_FIELDS: usize = 25;
pub const MAX_FIELD_NAME: usize = 256;
pub const MAX_FIELD_VALUE: usize = 1024;
pub const MAX_FOOTER: usize = 2048;
pub const MAX_TOTAL: usize = 6000;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

/// How much detail made it into the embed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EmbedLayout {
    /// One field per update.
    Fields,
    /// One description line per update.
    Lines,
    /// Comma separated package names.
    Names,
    /// Title and footer only.
    CountOnly,
}

fn length(text: &str) -> usize {
    text.chars().count()
}

fn truncated(text: String, limit: usize) -> String {
    if length(&text) <= limit {
        return text;
    }
    text.chars().take(limit).collect()
}

impl Embed {
    pub fn total_length(&self) -> usize {
        length(&self.title)
            + length(&self.description)
            + self.footer.as_ref().map_or(0, |footer| length(&footer.text))
            + self
                .fields
                .iter()
                .map(|field| length(&field.name) + length(&field.value))
                .sum::<usize>()
    }

    pub fn exceeds_limits(&self) -> bool {
        if length(&self.title) > MAX_TITLE {
            tracing::debug!("embed exceeds title limit");
            return true;
        }
        if length(&self.description) > MAX_DESCRIPTION {
            tracing::debug!("embed exceeds description limit");
            return true;
        }
        if self
            .footer
            .as_ref()
            .is_some_and(|footer| length(&footer.text) > MAX_FOOTER)
        {
            tracing::debug!("embed exceeds footer limit");
            return true;
        }
        if self.fields.len() > MAX_FIELDS
            || self.fields.iter().any(|field| {
                length(&field.name) > MAX_FIELD_NAME || length(&field.value) > MAX_FIELD_VALUE
            })
        {
            tracing::debug!("embed fields exceed limits");
            return true;
        }
        self.total_length() > MAX_TOTAL
    }
}

fn field_for(update: &Update) -> EmbedField {
    let value = match &update.old_version {
        Some(old) => format!("{old} -> {}", update.new_version),
        None => format!("New version {}", update.new_version),
    };
    EmbedField {
        name: update.name.clone(),
        value,
        inline: true,
    }
}

fn line_for(update: &Update) -> String {
    match &update.old_version {
        Some(old) => format!("{} [{old} -> {}]", update.name, update.new_version),
        None => format!("{} [{}]", update.name, update.new_version),
    }
}

/// Builds the notification embed, dropping detail until it fits the size
/// limits.
///
/// `pending` is the total number of pending updates and goes into the title;
/// `listed` are the updates worth naming.
pub fn build_embed(
    hostname: &str,
    pending: usize,
    listed: &[Update],
    checked: Option<OffsetDateTime>,
    footer_format: &OwnedFormatItem,
) -> (Embed, EmbedLayout) {
    let mut embed = Embed {
        title: truncated(format!("{pending} pending updates for {hostname}"), MAX_TITLE),
        footer: checked
            .and_then(|at| at.format(footer_format).ok())
            .map(|time| EmbedFooter {
                text: truncated(format!("Checked {time}"), MAX_FOOTER),
            }),
        ..Embed::default()
    };

    if listed.is_empty() {
        return (embed, EmbedLayout::CountOnly);
    }

    if listed.len() <= MAX_FIELDS {
        embed.fields = listed.iter().map(field_for).collect();
        if !embed.exceeds_limits() {
            return (embed, EmbedLayout::Fields);
        }
        embed.fields.clear();
    }

    embed.description = listed.iter().map(line_for).collect::<Vec<_>>().join("\n");
    if !embed.exceeds_limits() {
        return (embed, EmbedLayout::Lines);
    }

    tracing::debug!("embed description too long, trying names only");
    embed.description = listed
        .iter()
        .map(|update| update.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    if !embed.exceeds_limits() {
        return (embed, EmbedLayout::Names);
    }

    tracing::debug!("embed still too long, count only");
    embed.description.clear();
    (embed, EmbedLayout::CountOnly)
}
