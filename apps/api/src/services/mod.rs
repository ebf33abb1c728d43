pub mod embedding;
pub mod gemini;
pub mod generation;
pub mod model_output;
pub mod pinecone;
pub mod prompt;
pub mod recommendation;
pub mod vector_index;

// Re-export public types
pub use embedding::EmbeddingModel;
pub use gemini::GeminiClient;
pub use generation::GenerationModel;
pub use pinecone::PineconeIndex;
pub use recommendation::{PipelineSettings, RecommendationService};
pub use vector_index::{open_vector_index, LocalVectorIndex, VectorIndex};
