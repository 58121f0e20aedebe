//! 多模态消息构造

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// 消息内容片段，序列化为 OpenAI chat completions 格式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }
}

/// 图片与提示文本的拼接顺序，同一个 builder 构造的所有消息保持一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartOrder {
    #[default]
    MediaFirst,
    TextFirst,
}

/// 构造完成后不可变的多模态 user 消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultimodalMessage {
    parts: Vec<ContentPart>,
}

impl MultimodalMessage {
    pub fn parts(&self) -> &[ContentPart] {
        &self.parts
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, ContentPart::ImageUrl { .. }))
            .count()
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: Role::User,
            content: MessageContent::Parts(self.parts.clone()),
        }
    }
}

pub struct PayloadBuilder {
    order: PartOrder,
}

impl PayloadBuilder {
    pub fn new(order: PartOrder) -> Self {
        Self { order }
    }

    pub fn order(&self) -> PartOrder {
        self.order
    }

    /// `image_urls` 按原始顺序（帧的时间顺序）放入消息
    pub fn build(&self, prompt: &str, image_urls: &[String]) -> MultimodalMessage {
        let mut parts = Vec::with_capacity(image_urls.len() + 1);
        let images = image_urls.iter().map(|url| ContentPart::image(url.as_str()));

        match self.order {
            PartOrder::MediaFirst => {
                parts.extend(images);
                parts.push(ContentPart::text(prompt));
            }
            PartOrder::TextFirst => {
                parts.push(ContentPart::text(prompt));
                parts.extend(images);
            }
        }

        MultimodalMessage { parts }
    }
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new(PartOrder::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn urls() -> Vec<String> {
        vec!["data:image/jpeg;base64,AAA".into(), "data:image/jpeg;base64,BBB".into()]
    }

    #[test]
    fn test_media_first_order() {
        let message = PayloadBuilder::new(PartOrder::MediaFirst).build("描述视频", &urls());
        assert_eq!(message.parts().len(), 3);
        assert_eq!(message.parts()[0], ContentPart::image("data:image/jpeg;base64,AAA"));
        assert_eq!(message.parts()[1], ContentPart::image("data:image/jpeg;base64,BBB"));
        assert_eq!(message.parts()[2], ContentPart::text("描述视频"));
        assert_eq!(message.image_count(), 2);
    }

    #[test]
    fn test_text_first_order() {
        let message = PayloadBuilder::new(PartOrder::TextFirst).build("prompt", &urls());
        assert_eq!(message.parts()[0], ContentPart::text("prompt"));
        assert_eq!(message.image_count(), 2);
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = PayloadBuilder::default();
        let first = serde_json::to_vec(&builder.build("p", &urls()).to_chat_message()).unwrap();
        let second = serde_json::to_vec(&builder.build("p", &urls()).to_chat_message()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_text_only_message() {
        let message = PayloadBuilder::default().build("just text", &[]);
        assert_eq!(message.parts(), &[ContentPart::text("just text")]);
    }

    #[test]
    fn test_chat_message_wire_shape() {
        let message = PayloadBuilder::new(PartOrder::TextFirst)
            .build("hi", &["data:image/jpeg;base64,AAA".to_string()])
            .to_chat_message();
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": "hi"},
                    {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,AAA"}}
                ]
            })
        );

        let system = serde_json::to_value(ChatMessage::system("sys")).unwrap();
        assert_eq!(system, json!({"role": "system", "content": "sys"}));
    }
}
