pub mod onnx_embedder;
