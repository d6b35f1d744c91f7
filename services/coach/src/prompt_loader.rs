use anyhow::{Context, Result};
use jobmate_core::generator::Persona;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const HINT_KEY: &str = "hint";
pub const TITLE_KEY: &str = "title";

const INTERVIEWER_BASE: &str = "你是一位专业的面试官。请用中文与候选人交流。";
const SPOKEN_STYLE: &str = "每次只问一个问题，回复控制在三句话以内，适合直接朗读。";

pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// The prompts the chat clients need, with built-in text for anything the
/// prompts directory does not provide.
#[derive(Debug, Clone)]
pub struct PromptSet {
    prompts: HashMap<String, String>,
}

impl PromptSet {
    pub fn new(mut prompts: HashMap<String, String>) -> Self {
        for (key, text) in builtin_prompts() {
            prompts.entry(key).or_insert(text);
        }
        Self { prompts }
    }

    /// Loads overrides from `dir_path`. A missing directory just means defaults.
    pub fn load(dir_path: &Path) -> Result<Self> {
        if !dir_path.exists() {
            tracing::warn!("Prompts directory {} not found, using built-in prompts", dir_path.display());
            return Ok(Self::builtin());
        }
        Ok(Self::new(load_prompts(dir_path)?))
    }

    pub fn builtin() -> Self {
        Self::new(HashMap::new())
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    fn get(&self, key: &str) -> &str {
        self.prompts.get(key).map(|p| p.trim()).unwrap_or_default()
    }

    pub fn system_instruction(&self, persona: Persona) -> &str {
        self.get(persona.prompt_key())
    }

    pub fn hint(&self, question: &str) -> String {
        render(self.get(HINT_KEY), &[("question", question)])
    }

    pub fn title(&self, first_message: &str) -> String {
        render(self.get(TITLE_KEY), &[("first_message", first_message)])
    }
}

/// Replaces `{name}` placeholders.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), value)
    })
}

fn builtin_prompts() -> Vec<(String, String)> {
    let interviewer = |style: &str| format!("{INTERVIEWER_BASE}\n{style}\n{SPOKEN_STYLE}");
    vec![
        (
            Persona::Behavioral.prompt_key().to_string(),
            interviewer("这是一个行为面试（宝洁八大问）。考察候选人的软素质和领导力准则。"),
        ),
        (
            Persona::Technical.prompt_key().to_string(),
            interviewer("这是一个技术面试。专注于技术深度、代码概念和系统设计逻辑。"),
        ),
        (
            Persona::Pressure.prompt_key().to_string(),
            interviewer("这是一个压力面试。保持怀疑态度，偶尔打断，追问细节，测试候选人的抗压能力。"),
        ),
        (
            Persona::Open.prompt_key().to_string(),
            "你是 \"职伴 (JobMate)\"，一个富有同理心且专业的职业生涯规划师。你的目标是帮助学生挖掘过去的经历。\
             回复要口语化、自然、简短，每次严格控制在 50 字以内，一次只问一个问题，先肯定用户的情绪再进行引导，始终使用中文。"
                .to_string(),
        ),
        (
            HINT_KEY.to_string(),
            "作为面试教练，针对面试官的问题：“{question}”请给候选人一个简短的回答思路提示\
             （不要直接给答案，指出回答的关键点或STAR方向）。限制在30字以内。使用中文。"
                .to_string(),
        ),
        (
            TITLE_KEY.to_string(),
            "请根据以下用户输入，生成一个极简短的对话标题（摘要）。\n要求：\n1. 不超过 8 个中文字符。\n\
             2. 不要包含标点符号。\n3. 只要返回标题文本本身。\n\n用户输入: \"{first_message}\""
                .to_string(),
        ),
    ]
}
