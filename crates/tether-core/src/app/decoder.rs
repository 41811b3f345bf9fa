//! Decoder - payload が UTF-8 テキストかどうかの判定
//!
//! payload は Pub/Sub の wire 層で base64 から一度だけ戻されている。
//! ここではそれ以上の変換をせず、テキストとして読めるかだけを見る。

use crate::domain::{DecodeFailure, DecodedMessage, InboundMessage};

/// Decoder は payload がテキストかどうかを判定する
///
/// 失敗は伝播するエラーではなく値。pipeline は `MessageOutcome::DecodeFailed` として
/// 記録し、ack しない。そのメッセージは誰かが subscription から取り除くまで、
/// 以降の pull で毎回戻ってくる。
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder;

impl Decoder {
    pub fn new() -> Self {
        Self
    }

    /// 空の payload は空文字列になる
    pub fn decode<'a>(&self, payload: &'a [u8]) -> Result<&'a str, DecodeFailure> {
        std::str::from_utf8(payload).map_err(|e| DecodeFailure {
            valid_up_to: e.valid_up_to(),
            len: payload.len(),
        })
    }

    pub fn decode_message<'a>(
        &self,
        message: &'a InboundMessage,
    ) -> Result<DecodedMessage<'a>, DecodeFailure> {
        let text = self.decode(&message.payload)?;
        Ok(DecodedMessage {
            source: message,
            text,
        })
    }
}
