use crate::parser::{ANALYSIS_MARKER, SUMMARY_MARKER};

pub const INDEX_PROMPT: &str = "Provide the latest price change and percentage change for \
S&P 500 (^GSPC), Nasdaq Composite (^IXIC) and Dow Jones Industrial Average (^DJI). \
Return ONLY a valid JSON array with keys: name, symbol, change, percent, isUp. \
`change` is a number, `percent` is a string with sign and percent sign, `isUp` is a boolean. \
Example: [{\"name\":\"S&P 500\",\"symbol\":\"^GSPC\",\"change\":12.5,\"percent\":\"+0.25%\",\"isUp\":true}]";

pub const CHAT_FALLBACK_REPLY: &str = "目前無法回應這個問題，請換個方式提問。";

pub const GREETING: &str = "系統就緒。請載入盤面截圖，或直接輸入問題諮詢目前標的。";

/// Layout matches marker protocol version 1 in `parser.rs`.
pub fn analysis_prompt(symbol: &str) -> String {
    format!(
        "你是一位資深的量化交易員與美股技術分析師。分析標的：{symbol}。\n\
請判讀圖中的均線排列、K 線形態，以及支撐與壓力位。\n\
\n\
回覆必須嚴格使用以下格式：\n\
{SUMMARY_MARKER}\n\
150 字以內的精華總結：趨勢判斷、關鍵價位、操作建議核心。\n\
{ANALYSIS_MARKER}\n\
## 1. 趨勢診斷\n\
## 2. 關鍵價位（支撐 / 壓力）\n\
## 3. 操作策略（買入 / 賣出 / 觀望）\n\
\n\
重點請以 **粗體** 標示。"
    )
}

pub fn chat_system_instruction(symbol: &str, context: &str) -> String {
    let mut instruction = format!("你是專業的美股交易終端助手。目前關注的標的是 {symbol}。");
    if !context.trim().is_empty() {
        instruction.push_str("\n回答時請參考先前的技術分析報告：\n");
        instruction.push_str(context.trim());
    }
    instruction.push_str("\n請以專業、精煉且具洞察力的口吻回答，並適時提示風險。");
    instruction
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_prompt_embeds_symbol_and_markers() {
        let prompt = analysis_prompt("NVDA");
        assert!(prompt.contains("NVDA"));
        let summary_at = prompt.find(SUMMARY_MARKER).unwrap();
        let analysis_at = prompt.find(ANALYSIS_MARKER).unwrap();
        assert!(summary_at < analysis_at);
    }

    #[test]
    fn test_chat_instruction_context_is_optional() {
        let bare = chat_system_instruction("TSLA", "");
        assert!(bare.contains("TSLA"));
        assert!(!bare.contains("技術分析報告"));

        let grounded = chat_system_instruction("TSLA", "## 趨勢\n多頭排列");
        assert!(grounded.contains("多頭排列"));
    }
}
