//! 工作流引擎
//!
//! Supervisor -> Router -> {专家 | Supervisor | 澄清 | Synthesis}；专家与澄清步骤结束后回到 Supervisor，
//! Synthesis 为终态。状态按值在各步骤之间传递，同一时刻只有一个步骤持有它。

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::agents::{
    ClarificationStep, Specialist, Supervisor, SynthesisComposer, LOW_CONFIDENCE_DISCLAIMER,
};
use crate::core::{CheckKind, ConversationState, PatientProfile};
use crate::llm::LlmClient;
use crate::workflow::router::route;
use crate::workflow::types::{NextStep, WorkflowAnswer, WorkflowLimits};

pub struct WorkflowEngine {
    pub(crate) llm: Arc<dyn LlmClient>,
    pub(crate) supervisor: Supervisor,
    pub(crate) specialists: Vec<Box<dyn Specialist>>,
    pub(crate) clarification: ClarificationStep,
    pub(crate) synthesis: SynthesisComposer,
    pub(crate) limits: WorkflowLimits,
}

impl WorkflowEngine {
    pub fn limits(&self) -> WorkflowLimits {
        self.limits
    }

    /// 推理服务累计 token：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    fn specialist(&self, kind: CheckKind) -> Option<&dyn Specialist> {
        self.specialists
            .iter()
            .find(|s| s.kind() == kind)
            .map(|s| s.as_ref())
    }

    async fn run_specialist(&self, kind: CheckKind, state: ConversationState) -> ConversationState {
        match self.specialist(kind) {
            Some(specialist) => specialist.run(state).await,
            None => {
                tracing::error!("No {} specialist registered", kind);
                let mut state = state;
                state.error_message = Some(format!("no {} specialist registered", kind));
                state
            }
        }
    }

    /// 从给定状态一直运行到 synthesis 或 END
    pub async fn run(&self, mut state: ConversationState) -> ConversationState {
        let mut step = NextStep::Supervisor;
        loop {
            tracing::debug!("Executing node: {}", step);
            step = match step {
                NextStep::Supervisor => {
                    state = self.supervisor.step(state).await;
                    route(&state, self.limits.max_iterations)
                }
                NextStep::SafetyCheck => {
                    state = self.run_specialist(CheckKind::Safety, state).await;
                    NextStep::Supervisor
                }
                NextStep::DeficiencyCheck => {
                    state = self.run_specialist(CheckKind::Deficiency, state).await;
                    NextStep::Supervisor
                }
                NextStep::Recommendation => {
                    state = self.run_specialist(CheckKind::Recommendation, state).await;
                    NextStep::Supervisor
                }
                NextStep::Clarification => {
                    state = self.clarification.run(state).await;
                    NextStep::Supervisor
                }
                NextStep::Synthesis => {
                    state = self.synthesis.run(state).await;
                    break;
                }
                NextStep::End => break,
            };
        }
        state
    }

    /// 对外入口：不返回错误，失败体现在回答文本与置信度上
    pub async fn answer(&self, question: &str, profile: PatientProfile) -> WorkflowAnswer {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        tracing::info!("[{}] Workflow started: {}", run_id, question);

        let state = self.run(ConversationState::new(question, profile)).await;

        let answer = match state.final_answer() {
            Some(answer) => answer.to_string(),
            None => {
                tracing::warn!("[{}] Workflow ended without a final answer", run_id);
                format!(
                    "I'm sorry, I could not complete the analysis for your question.{}",
                    LOW_CONFIDENCE_DISCLAIMER
                )
            }
        };
        let finished_at = Utc::now();
        tracing::info!(
            "[{}] Workflow finished: {} iteration(s), confidence {:.2}, {} ms",
            run_id,
            state.iterations(),
            state.confidence_level(),
            (finished_at - started_at).num_milliseconds()
        );
        let (prompt_tokens, completion_tokens, total_tokens) = self.token_usage();
        tracing::debug!(
            "[{}] Cumulative token usage: prompt={}, completion={}, total={}",
            run_id,
            prompt_tokens,
            completion_tokens,
            total_tokens
        );

        WorkflowAnswer {
            run_id,
            answer,
            confidence: state.confidence_level(),
            iterations: state.iterations(),
            evidence_chain: state.evidence_chain.into_vec(),
            started_at,
            finished_at,
        }
    }
}
