//! SynthesisComposer：终态，把档案与各专家结果交给推理服务生成最终回答
//!
//! 低置信度免责声明在本地追加，不依赖推理服务输出。
//! 有 error_message 时不调用推理服务，直接给出致歉 + 本地摘要。

use std::sync::Arc;

use crate::core::{
    ConversationState, DeficiencyReport, DeficiencyVerdict, RecommendationReport, SafetyReport,
};
use crate::llm::LlmClient;

pub const DEFAULT_SYNTHESIS_MAX_TOKENS: u32 = 1500;

pub const LOW_CONFIDENCE_DISCLAIMER: &str = "\n\n⚠️ **Note**: This analysis has moderate confidence. Please consult with your healthcare provider before making changes.";

const SAFE_OPTIONS_SHOWN: usize = 10;
const UNSAFE_OPTIONS_SHOWN: usize = 5;

pub struct SynthesisComposer {
    llm: Arc<dyn LlmClient>,
    confidence_threshold: f64,
    max_tokens: u32,
}

impl SynthesisComposer {
    pub fn new(llm: Arc<dyn LlmClient>, confidence_threshold: f64) -> Self {
        Self {
            llm,
            confidence_threshold,
            max_tokens: DEFAULT_SYNTHESIS_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub async fn run(&self, mut state: ConversationState) -> ConversationState {
        let confidence = state.confidence_level();
        let mut answer = match &state.error_message {
            Some(error) => {
                tracing::error!("Synthesizing after fatal error: {}", error);
                apology(&state)
            }
            None => {
                let prompt = synthesis_prompt(&build_context(&state), confidence);
                match self.llm.complete_prompt(&prompt, self.max_tokens).await {
                    Ok(text) => text.trim().to_string(),
                    Err(e) => {
                        tracing::warn!("Synthesis call failed ({}), using local summary", e);
                        local_summary(&state)
                    }
                }
            }
        };

        if state.error_message.is_some() || confidence < self.confidence_threshold {
            answer.push_str(LOW_CONFIDENCE_DISCLAIMER);
        }

        tracing::info!(
            "Synthesis complete after {} iteration(s), confidence {:.2}",
            state.iterations(),
            confidence
        );
        state
            .evidence_chain
            .push(format!("Synthesis: final answer composed (confidence {:.2})", confidence));
        if let Err(e) = state.set_final_answer(answer) {
            tracing::warn!("Final answer already set: {}", e);
        }
        state
    }
}

fn join_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

fn safety_section(report: &SafetyReport) -> String {
    let mut s = String::from("=== SAFETY CHECK ===\n");
    s.push_str(&format!("Verdict: {}\n", report.verdict));
    if !report.interactions.is_empty() {
        s.push_str(&format!("Interactions Found: {}\n", report.interactions.len()));
        for ix in &report.interactions {
            s.push_str(&format!(
                "  - {} <-> {}: {} [{}, {}]\n",
                ix.supplement, ix.target, ix.description, ix.severity, ix.pathway
            ));
        }
    }
    s.push_str(&format!("Confidence: {:.2}\n\n", report.confidence));
    s
}

fn deficiency_section(report: &DeficiencyReport) -> String {
    let mut s = String::from("=== DEFICIENCY ANALYSIS ===\n");
    s.push_str(&format!("Verdict: {}\n", report.verdict));
    if report.verdict == DeficiencyVerdict::CheckFailed {
        s.push_str(&format!(
            "Nutrient data could not be retrieved ({} failed queries); \
             do not conclude that there are no risks\n",
            report.failed_queries
        ));
    }
    if !report.nutrient_sources.is_empty() {
        s.push_str(&format!(
            "Nutrients at Risk: {}\n",
            report.nutrient_sources.keys().cloned().collect::<Vec<_>>().join(", ")
        ));
        for (nutrient, sources) in &report.nutrient_sources {
            for source in sources {
                s.push_str(&format!(
                    "  - {}: {} risk from {} ({})\n",
                    nutrient, source.risk_level, source.source_type, source.source_name
                ));
            }
        }
    }
    for overlap in &report.critical_overlaps {
        s.push_str(&format!(
            "CRITICAL OVERLAP: {} ({} sources, highest individual risk {})\n",
            overlap.nutrient,
            overlap.sources.len(),
            overlap.highest_individual_risk
        ));
    }
    if !report.suggestions.is_empty() {
        s.push_str("Supplement Suggestions:\n");
        for suggestion in &report.suggestions {
            s.push_str(&format!(
                "  - {} for {}: {}\n",
                suggestion.supplement, suggestion.nutrient, suggestion.status
            ));
            for warning in &suggestion.warnings {
                s.push_str(&format!("    - {}\n", warning));
            }
        }
    }
    s.push_str(&format!("Confidence: {:.2}\n\n", report.confidence));
    s
}

fn recommendation_section(report: &RecommendationReport) -> String {
    let mut s = String::from("=== RECOMMENDATIONS ===\n");
    let Some(condition) = &report.condition else {
        s.push_str("No condition or symptom to address\n\n");
        return s;
    };
    s.push_str(&format!("For: {}\n", condition));
    s.push_str(&format!(
        "Total found: {} ({} safe, {} unsafe)\n\n",
        report.recommendations.len(),
        report.safe_count,
        report.unsafe_count
    ));

    let safe: Vec<_> = report.recommendations.iter().filter(|r| r.safe).collect();
    if !safe.is_empty() {
        s.push_str(&format!("SAFE OPTIONS ({}):\n", safe.len()));
        for rec in safe.iter().take(SAFE_OPTIONS_SHOWN) {
            s.push_str(&format!("{}. {}\n", rec.rank, rec.name));
            s.push_str(&format!("   - Safety Rating: {}\n", rec.grade));
            s.push_str(&format!(
                "   - Treats: {}\n",
                rec.symptom_treated.as_deref().unwrap_or("N/A")
            ));
            s.push_str(&format!("   - Verdict: {}\n", rec.safety_verdict));
        }
        s.push('\n');
    }

    let unsafe_options: Vec<_> = report.recommendations.iter().filter(|r| !r.safe).collect();
    if !unsafe_options.is_empty() {
        s.push_str(&format!("NOT RECOMMENDED ({}):\n", unsafe_options.len()));
        for rec in unsafe_options.iter().take(UNSAFE_OPTIONS_SHOWN) {
            s.push_str(&format!("{}. {}\n", rec.rank, rec.name));
            s.push_str(&format!("   - Verdict: {}\n", rec.safety_verdict));
            if !rec.interactions.is_empty() {
                s.push_str(&format!("   - Interactions: {} found\n", rec.interactions.len()));
            }
        }
        s.push('\n');
    }
    s.push_str(&format!("Confidence: {:.2}\n\n", report.confidence));
    s
}

/// 档案 + 各专家结果的文本上下文
pub fn build_context(state: &ConversationState) -> String {
    let mut context = format!("Question: {}\n\n", state.question());
    context.push_str(&format!(
        "Patient Medications: {}\n",
        join_or_none(&state.medication_names())
    ));
    context.push_str(&format!(
        "Patient Supplements: {}\n",
        join_or_none(&state.supplement_names())
    ));
    if !state.profile().conditions.is_empty() {
        context.push_str(&format!(
            "Conditions: {}\n",
            state.profile().conditions.join(", ")
        ));
    }
    let diet = state.dietary_restrictions();
    if !diet.is_empty() {
        context.push_str(&format!("Diet: {}\n", diet.join(", ")));
    }
    context.push('\n');

    if let Some(report) = state.safety() {
        context.push_str(&safety_section(report));
    }
    if let Some(report) = state.deficiency() {
        context.push_str(&deficiency_section(report));
    }
    if let Some(report) = state.recommendation() {
        context.push_str(&recommendation_section(report));
    }
    context
}

fn synthesis_prompt(context: &str, confidence: f64) -> String {
    format!(
        r#"You are a personalized supplement safety advisor. Create a clear, helpful answer based on this analysis:

{context}
Overall Confidence: {confidence:.2}

Guidelines:
- START by naming the actual supplements found
- Be specific and use the exact supplement names from the analysis above
- For safe options: present them clearly with their safety ratings
- For unsafe options: explain why they are not recommended
- Include relevant safety or deficiency findings if present
- Use accessible language and avoid jargon
- Be empathetic and supportive
- Format with markdown for readability

Create a personalized answer:"#
    )
}

/// 推理服务不可用时的本地摘要
pub fn local_summary(state: &ConversationState) -> String {
    let mut lines = vec![format!("Summary for: {}", state.question())];
    if let Some(r) = state.safety() {
        lines.push(format!(
            "- Safety: {} ({} interaction(s) found)",
            r.verdict,
            r.interactions.len()
        ));
        for ix in r.interactions.iter().take(5) {
            lines.push(format!(
                "  - {} with {}: {} ({})",
                ix.supplement, ix.target, ix.description, ix.severity
            ));
        }
    }
    if let Some(r) = state.deficiency() {
        lines.push(format!(
            "- Nutrients: {} ({} at risk, {} critical overlap(s))",
            r.verdict,
            r.total_count,
            r.critical_overlaps.len()
        ));
        for overlap in &r.critical_overlaps {
            lines.push(format!("  - {} is affected by multiple sources", overlap.nutrient));
        }
    }
    if let Some(r) = state.recommendation() {
        let safe_names: Vec<&str> = r
            .recommendations
            .iter()
            .filter(|rec| rec.safe)
            .take(SAFE_OPTIONS_SHOWN)
            .map(|rec| rec.name.as_str())
            .collect();
        lines.push(format!(
            "- Recommendations: {} safe option(s){}",
            r.safe_count,
            if safe_names.is_empty() {
                String::new()
            } else {
                format!(": {}", safe_names.join(", "))
            }
        ));
    }
    if lines.len() == 1 {
        lines.push("- No checks were completed.".to_string());
    }
    lines.join("\n")
}

fn apology(state: &ConversationState) -> String {
    format!(
        "I'm sorry, I ran into a problem while analyzing your question and could not complete \
         every check.\n\n{}",
        local_summary(state)
    )
}
