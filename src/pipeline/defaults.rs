use crate::alignment::{read_artifact, AlignmentFailure, AlignmentOutcome, AlignmentRequest};
use crate::pipeline::traits::{AlignmentBackend, BatchAligner};

/// Adapts a backend that only writes alignment files into a per-file
/// aligner. A file counts as aligned only if its artifact exists and is
/// well-formed.
pub struct ArtifactAligner<B> {
    backend: B,
}

impl<B: AlignmentBackend> ArtifactAligner<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

impl<B: AlignmentBackend> BatchAligner for ArtifactAligner<B> {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn align_batch(&self, requests: &[AlignmentRequest]) -> Vec<AlignmentOutcome> {
        if let Err(err) = self.backend.write_alignments(requests) {
            // The backend may still have written some artifacts before failing.
            tracing::warn!(aligner = self.backend.name(), error = %err, "alignment backend failed");
            let reason = err.to_string();
            return requests
                .iter()
                .map(|request| match read_artifact(&request.output) {
                    Err(AlignmentFailure::MissingArtifact) => {
                        Err(AlignmentFailure::Backend(reason.clone()))
                    }
                    other => other,
                })
                .collect();
        }
        requests
            .iter()
            .map(|request| read_artifact(&request.output))
            .collect()
    }
}
