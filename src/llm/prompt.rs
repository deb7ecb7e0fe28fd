//! Prompt assembly and the user-visible message catalogue.

use serde::{Deserialize, Serialize};

/// Language of every message returned to chat users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    Ja,
    En,
}

/// Fixed, user-safe strings. None of them ever carries provider detail.
#[derive(Debug, Clone, Copy)]
pub struct Messages {
    pub no_context: &'static str,
    pub timeout: &'static str,
    pub quota_exceeded: &'static str,
    pub provider_error: &'static str,
    pub unknown_error: &'static str,
    pub fallback_heading: &'static str,
    pub default_persona: &'static str,
    context_label: &'static str,
    question_label: &'static str,
    directives: &'static str,
}

const JA: Messages = Messages {
    no_context: "申し訳ありませんが、お尋ねの件について保存されている情報が見つかりませんでした。もう少し詳しく教えていただけますでしょうか？",
    timeout: "現在AIの応答生成に時間がかかっています。少し待ってからもう一度お試しください。",
    quota_exceeded: "Gemini APIの利用上限に達しました",
    provider_error: "AIサービスの呼び出しに失敗しました。時間をおいて再度お試しください。",
    unknown_error: "回答の生成中にエラーが発生しました。別の質問でお試しいただけますか？",
    fallback_heading: "【参考情報（ナレッジからの抜粋）】",
    default_persona: "あなたは親しみやすく知識豊富なAIチャットボットです。

【基本方針】
1. 提供された資料に基づいて正確に回答する
2. 自然で親しみやすい対話を心がける
3. 質問の意図を理解し、適切な情報を選択して回答する

【回答の作り方】
1. 質問に直接関連する最も重要な情報を優先する
2. 具体的な情報や特徴を含める
3. 結論や要点を明確に示す
4. 専門用語には簡潔な説明を添える

【文章の構成】
1. 簡潔で分かりやすい文章構成
2. 重要なポイントは**太字**で強調
3. 情報を整理して箇条書きやリストを活用
4. 適度な改行で読みやすさを重視",
    context_label: "【利用可能な情報】",
    question_label: "【ユーザーの質問】",
    directives: "上記の情報の中から、質問に最も適した内容を選択し、以下の点に注意してチャットボットとして回答してください：

1. **構造化された回答**: 複数のポイントがある場合は、適切に整理して提示する
2. **読みやすさ**: 長い文章は段落分けし、重要な箇所は強調する
3. **簡潔性**: 冗長な表現を避け、要点を明確に伝える
4. **親しみやすさ**: 自然で人間らしい対話スタイルを維持する
5. **情報の関連性**: 質問の意図に最も合う情報を中心に、分かりやすく説明する

情報が複数ある場合は、質問の意図に最も合うものを中心に、整理された形で回答してください。",
};

const EN: Messages = Messages {
    no_context: "Sorry, we could not find any stored information about your question. Could you tell us a little more?",
    timeout: "The AI is taking longer than usual to respond. Please wait a moment and try again.",
    quota_exceeded: "The AI service has reached its usage limit",
    provider_error: "The AI service could not be reached. Please try again later.",
    unknown_error: "Something went wrong while generating the answer. Could you try a different question?",
    fallback_heading: "[Reference information (excerpts from the knowledge base)]",
    default_persona: "You are a friendly and knowledgeable AI chatbot.

[Principles]
1. Answer accurately, based on the provided material
2. Keep the conversation natural and approachable
3. Understand the intent of the question and pick the relevant information

[How to answer]
1. Put the information most directly related to the question first
2. Include concrete details and characteristics
3. State conclusions and key points clearly
4. Add a short explanation to technical terms

[Structure]
1. Short, easy to follow sentences
2. Emphasize key points in **bold**
3. Organize information with bullet points or lists
4. Use line breaks for readability",
    context_label: "[Available information]",
    question_label: "[User question]",
    directives: "From the information above, choose what best fits the question and answer as a chatbot, keeping in mind:

1. **Structure**: organize the answer when there are several points
2. **Readability**: split long text into paragraphs and emphasize key parts
3. **Brevity**: avoid redundancy and state the point clearly
4. **Friendliness**: keep a natural, human conversational style
5. **Relevance**: focus on the information that best matches the intent of the question

When several pieces of information apply, center the answer on the one that best matches the question and keep it well organized.",
};

impl Language {
    pub fn messages(self) -> &'static Messages {
        match self {
            Language::Ja => &JA,
            Language::En => &EN,
        }
    }
}

/// Persona, then the retrieved context verbatim, then the question, then
/// the formatting directives.
pub fn build_prompt(
    language: Language,
    persona: Option<&str>,
    context: &str,
    query: &str,
) -> String {
    let messages = language.messages();
    let persona = persona
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(messages.default_persona);

    format!(
        "{persona}\n\n{context_label}\n{context}\n\n{question_label}\n{query}\n\n{directives}\n",
        persona = persona,
        context_label = messages.context_label,
        context = context,
        question_label = messages.question_label,
        query = query,
        directives = messages.directives,
    )
}
