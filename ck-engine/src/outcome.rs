/// Whether the watched actor actually performed the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed { signature: String },
}

impl Outcome {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// Detects failed attempts by case-sensitive substring match on the event text.
#[derive(Debug, Clone, Default)]
pub struct OutcomeClassifier {
    global_signatures: Vec<String>,
}

impl OutcomeClassifier {
    pub fn new(global_signatures: Vec<String>) -> Self {
        Self {
            global_signatures: global_signatures
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Either text containing any global or action signature suppresses the start.
    pub fn classify(
        &self,
        action_signatures: &[String],
        body: Option<&str>,
        summary: Option<&str>,
    ) -> Outcome {
        let texts = [body, summary];
        let matched = self
            .global_signatures
            .iter()
            .chain(action_signatures.iter())
            .filter(|signature| !signature.is_empty())
            .find(|signature| {
                texts
                    .iter()
                    .flatten()
                    .any(|text| text.contains(signature.as_str()))
            });
        match matched {
            Some(signature) => Outcome::Failed {
                signature: signature.clone(),
            },
            None => Outcome::Succeeded,
        }
    }
}
