use alcoguard_core::domain::payload::VetoPayload;
use alcoguard_core::domain::session::{SessionId, UserId};
use alcoguard_core::domain::warning::WarningLevel;
use alcoguard_core::risk::{RecommendationTier, SessionAnalysis};

/// Decides whether an analysis is severe enough to veto the next drink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VetoPolicy {
    threshold: WarningLevel,
}

impl Default for VetoPolicy {
    fn default() -> Self {
        Self { threshold: WarningLevel::Warning }
    }
}

impl VetoPolicy {
    pub fn new(threshold: WarningLevel) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> WarningLevel {
        self.threshold
    }

    pub fn should_veto(&self, analysis: &SessionAnalysis) -> bool {
        analysis.data_available && analysis.warning_level >= self.threshold
    }

    /// The veto the guardian should send for this user's session, if any.
    /// Unavailable data never vetoes.
    pub fn evaluate(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        analysis: &SessionAnalysis,
    ) -> Option<VetoPayload> {
        if !self.should_veto(analysis) {
            return None;
        }

        let reason = analysis
            .recommendations
            .iter()
            .find(|item| item.tier >= RecommendationTier::Warning)
            .map(|item| item.message.clone())
            .unwrap_or_else(|| analysis.warning_level.message().to_owned());

        Some(VetoPayload {
            veto: true,
            reason,
            severity: analysis.warning_level,
            user_id: user_id.0.clone(),
            session_id: session_id.0.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use alcoguard_core::domain::payload::VetoPayload;
    use alcoguard_core::domain::session::{SessionId, UserId};
    use alcoguard_core::domain::warning::{InterventionLevel, WarningLevel};
    use alcoguard_core::risk::{Recommendation, RecommendationTier, SessionAnalysis};

    use super::VetoPolicy;

    fn evaluate(policy: VetoPolicy, analysis: &SessionAnalysis) -> Option<VetoPayload> {
        policy.evaluate(&UserId("u-1".to_owned()), &SessionId("ses-1".to_owned()), analysis)
    }

    fn analysis(level: InterventionLevel, recommendations: Vec<Recommendation>) -> SessionAnalysis {
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 21, 0, 0).single().expect("valid time");
        let mut analysis = SessionAnalysis::unavailable(now);
        analysis.data_available = true;
        analysis.intervention_level = level;
        analysis.warning_level = level.warning_level();
        analysis.recommendations = recommendations;
        analysis
    }

    #[test]
    fn below_threshold_does_not_veto() {
        let policy = VetoPolicy::default();
        assert!(evaluate(policy, &analysis(InterventionLevel::None, Vec::new())).is_none());
        assert!(evaluate(policy, &analysis(InterventionLevel::Low, Vec::new())).is_none());
    }

    #[test]
    fn reason_prefers_the_first_serious_recommendation() {
        let recommendations = vec![
            Recommendation { tier: RecommendationTier::Info, message: "water".to_owned() },
            Recommendation { tier: RecommendationTier::Urgent, message: "stop now".to_owned() },
        ];
        let veto = evaluate(VetoPolicy::default(), &analysis(InterventionLevel::High, recommendations))
            .expect("veto");

        assert!(veto.veto);
        assert_eq!(veto.user_id, "u-1");
        assert_eq!(veto.session_id, "ses-1");
        assert_eq!(veto.reason, "stop now");
        assert_eq!(veto.severity, WarningLevel::Stop);
    }

    #[test]
    fn reason_falls_back_to_the_level_message() {
        let veto = evaluate(VetoPolicy::default(), &analysis(InterventionLevel::Medium, Vec::new()))
            .expect("veto");
        assert_eq!(veto.reason, WarningLevel::Warning.message());
    }

    #[test]
    fn unavailable_data_never_vetoes() {
        let mut stale = analysis(InterventionLevel::High, Vec::new());
        stale.data_available = false;
        assert!(evaluate(VetoPolicy::new(WarningLevel::Caution), &stale).is_none());
    }

    #[test]
    fn stricter_threshold_vetoes_earlier() {
        let low = analysis(InterventionLevel::Low, Vec::new());
        assert!(evaluate(VetoPolicy::new(WarningLevel::Caution), &low).is_some());
    }
}
