use std::{fs, path::Path, path::PathBuf};

use parking_lot::Mutex;
use tch::{Device, IValue, Tensor, no_grad};
use tokenizers::Tokenizer;

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{
        ModelMetadata, Translation,
        provider::{ModelProvider, TranslationModel},
    },
};

const START_TOKENS: &[&str] = &["[START]", "[start]", "<s>", "[CLS]"];
const END_TOKENS: &[&str] = &["[END]", "[end]", "</s>", "[SEP]"];

pub const MACHINE_TRANSLATION_NOTE: &str =
    "Machine translation; accuracy may vary for long or idiomatic sentences.";

/// Builds TorchScript encoder-decoder translators from the configured
/// tokenizers and device.
pub struct TorchProvider {
    source_tokenizer_path: PathBuf,
    target_tokenizer_path: PathBuf,
    device: Device,
    max_output_tokens: usize,
}

impl TorchProvider {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            source_tokenizer_path: config.source_tokenizer_path.clone(),
            target_tokenizer_path: config.target_tokenizer_path.clone(),
            device: config.device,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

impl ModelProvider for TorchProvider {
    type Model = TorchTranslator;

    fn build(&self) -> Result<TorchTranslator, ServiceError> {
        let source = load_tokenizer(&self.source_tokenizer_path)?;
        let target = load_tokenizer(&self.target_tokenizer_path)?;
        let start_id = special_token_id(&target, START_TOKENS)?;
        let end_id = special_token_id(&target, END_TOKENS)?;

        Ok(TorchTranslator {
            source,
            target,
            start_id,
            end_id,
            device: self.device,
            max_output_tokens: self.max_output_tokens,
            weights: None,
        })
    }
}

struct LoadedWeights {
    path: PathBuf,
    size_bytes: u64,
    module: Mutex<tch::CModule>,
}

pub struct TorchTranslator {
    source: Tokenizer,
    target: Tokenizer,
    start_id: i64,
    end_id: i64,
    device: Device,
    max_output_tokens: usize,
    weights: Option<LoadedWeights>,
}

impl TorchTranslator {
    fn finish(&self, decoded: &Decoded) -> Result<Translation, ServiceError> {
        let ids: Vec<u32> = decoded.ids.iter().map(|&id| id as u32).collect();
        let translated = self
            .target
            .decode(&ids, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;

        Ok(Translation {
            text: translated.trim().to_string(),
            note: decoding_note(decoded.finished, self.max_output_tokens),
        })
    }
}

impl TranslationModel for TorchTranslator {
    fn load_weights(&mut self, path: &Path) -> Result<(), ServiceError> {
        let size_bytes = fs::metadata(path)?.len();
        let mut module = tch::CModule::load_on_device(path, self.device)
            .map_err(|e| ServiceError::ModelLoad(e.to_string()))?;
        module.set_eval();

        self.weights = Some(LoadedWeights {
            path: path.to_path_buf(),
            size_bytes,
            module: Mutex::new(module),
        });
        Ok(())
    }

    fn translate(&self, text: &str) -> Result<Translation, ServiceError> {
        if text.trim().is_empty() {
            return Ok(Translation {
                text: String::new(),
                note: MACHINE_TRANSLATION_NOTE.to_string(),
            });
        }

        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| ServiceError::ModelLoad("weights have not been loaded".into()))?;

        let encoding = self
            .source
            .encode(text, true)
            .map_err(|e| ServiceError::Tokenizer(e.to_string()))?;
        let source_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();

        let decoded = no_grad(|| {
            let module = weights.module.lock();
            let source_tensor = Tensor::from_slice(&source_ids)
                .reshape([1, source_ids.len() as i64])
                .to(self.device);

            greedy_decode(self.start_id, self.end_id, self.max_output_tokens, |prefix| {
                let target_tensor = Tensor::from_slice(prefix)
                    .reshape([1, prefix.len() as i64])
                    .to(self.device);

                let output = module
                    .forward_is(&[
                        IValue::Tensor(source_tensor.shallow_clone()),
                        IValue::Tensor(target_tensor),
                    ])
                    .map_err(|e| ServiceError::TranslationFailed(e.to_string()))?;
                let logits = first_tensor(output)?;

                // logits: [1, target_len, vocab]
                Ok(logits
                    .select(1, -1)
                    .squeeze()
                    .argmax(0, false)
                    .int64_value(&[]))
            })
        })?;

        self.finish(&decoded)
    }

    fn metadata(&self) -> ModelMetadata {
        let (weights_path, size_bytes) = self
            .weights
            .as_ref()
            .map(|w| (w.path.clone(), w.size_bytes))
            .unwrap_or_default();

        ModelMetadata {
            name: "en-hi-transformer".to_string(),
            weights_path,
            size_bytes,
            device: format!("{:?}", self.device),
        }
    }
}

/// Target ids produced after the start token, without the end token.
#[derive(Debug, PartialEq, Eq)]
struct Decoded {
    ids: Vec<i64>,
    finished: bool,
}

/// Greedy autoregressive loop. `next_token` maps the current target prefix
/// (starting with `start_id`) to the id to append.
fn greedy_decode<F>(
    start_id: i64,
    end_id: i64,
    max_tokens: usize,
    mut next_token: F,
) -> Result<Decoded, ServiceError>
where
    F: FnMut(&[i64]) -> Result<i64, ServiceError>,
{
    let mut prefix = vec![start_id];
    for _ in 0..max_tokens {
        let next = next_token(&prefix)?;
        if next == end_id {
            return Ok(Decoded {
                ids: prefix.split_off(1),
                finished: true,
            });
        }
        prefix.push(next);
    }

    Ok(Decoded {
        ids: prefix.split_off(1),
        finished: false,
    })
}

fn decoding_note(finished: bool, max_tokens: usize) -> String {
    if finished {
        MACHINE_TRANSLATION_NOTE.to_string()
    } else {
        format!("Output truncated after {max_tokens} tokens; the sentence may be incomplete.")
    }
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer, ServiceError> {
    Tokenizer::from_file(path)
        .map_err(|e| ServiceError::Tokenizer(format!("{}: {e}", path.display())))
}

fn special_token_id(tokenizer: &Tokenizer, candidates: &[&str]) -> Result<i64, ServiceError> {
    candidates
        .iter()
        .find_map(|token| tokenizer.token_to_id(token))
        .map(|id| id as i64)
        .ok_or_else(|| {
            ServiceError::Tokenizer(format!(
                "target tokenizer defines none of the special tokens {candidates:?}"
            ))
        })
}

// Traced seq2seq modules return either the logits or a tuple led by them.
fn first_tensor(output: IValue) -> Result<Tensor, ServiceError> {
    match output {
        IValue::Tensor(t) => Ok(t),
        IValue::Tuple(tuple) => match tuple.into_iter().next() {
            Some(IValue::Tensor(t)) => Ok(t),
            _ => Err(ServiceError::TranslationFailed(
                "expected tensor as first tuple element".into(),
            )),
        },
        _ => Err(ServiceError::TranslationFailed(
            "unexpected model output format".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn write_word_level(dir: &Path, name: &str, words: &[&str]) -> PathBuf {
        let vocab: serde_json::Map<String, serde_json::Value> = words
            .iter()
            .enumerate()
            .map(|(id, word)| (word.to_string(), json!(id)))
            .collect();
        let tokenizer = json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]" }
        });
        let path = dir.join(name);
        std::fs::write(&path, tokenizer.to_string()).unwrap();
        path
    }

    fn provider(dir: &Path, target_words: &[&str], max_output_tokens: usize) -> TorchProvider {
        let source_words = ["[UNK]", "hello", "world"];
        TorchProvider {
            source_tokenizer_path: write_word_level(dir, "en.json", &source_words),
            target_tokenizer_path: write_word_level(dir, "hi.json", target_words),
            device: Device::Cpu,
            max_output_tokens,
        }
    }

    #[test]
    fn special_tokens_fall_back_across_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let translator = provider(dir.path(), &["[UNK]", "</s>", "<s>", "नमस्ते"], 8)
            .build()
            .unwrap();

        assert_eq!(translator.start_id, 2);
        assert_eq!(translator.end_id, 1);
    }

    #[test]
    fn target_without_special_tokens_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = provider(dir.path(), &["[UNK]", "नमस्ते"], 8).build().err().unwrap();
        assert!(matches!(err, ServiceError::Tokenizer(msg) if msg.contains("[START]")));
    }

    #[test]
    fn blank_input_skips_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let translator = provider(dir.path(), &["[UNK]", "[START]", "[END]"], 8)
            .build()
            .unwrap();

        for text in ["", "   ", "\n\t"] {
            let translation = translator.translate(text).unwrap();
            assert_eq!(translation.text, "");
            assert_eq!(translation.note, MACHINE_TRANSLATION_NOTE);
        }
    }

    #[test]
    fn text_without_weights_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let translator = provider(dir.path(), &["[UNK]", "[START]", "[END]"], 8)
            .build()
            .unwrap();

        let err = translator.translate("hello world").unwrap_err();
        assert!(matches!(err, ServiceError::ModelLoad(_)));
        assert_eq!(translator.metadata().size_bytes, 0);
    }

    #[test]
    fn decoding_stops_at_end_token() {
        let mut script = vec![7, 8, 2, 9].into_iter();
        let mut seen = Vec::new();
        let decoded = greedy_decode(1, 2, 10, |prefix| {
            seen.push(prefix.to_vec());
            Ok(script.next().unwrap())
        })
        .unwrap();

        assert_eq!(
            decoded,
            Decoded {
                ids: vec![7, 8],
                finished: true,
            }
        );
        assert_eq!(seen, vec![vec![1], vec![1, 7], vec![1, 7, 8]]);
    }

    #[test]
    fn decoding_truncates_at_token_limit() {
        let decoded = greedy_decode(1, 2, 3, |_| Ok(5)).unwrap();
        assert_eq!(decoded.ids, vec![5, 5, 5]);
        assert!(!decoded.finished);
        assert_eq!(
            decoding_note(decoded.finished, 3),
            "Output truncated after 3 tokens; the sentence may be incomplete."
        );
    }

    #[test]
    fn step_errors_abort_decoding() {
        let err = greedy_decode(1, 2, 3, |_| {
            Err(ServiceError::TranslationFailed("nan logits".into()))
        })
        .unwrap_err();
        assert!(matches!(err, ServiceError::TranslationFailed(_)));
    }

    #[test]
    fn finish_decodes_target_ids_with_note() {
        let dir = tempfile::tempdir().unwrap();
        let words = ["[UNK]", "[START]", "[END]", "नमस्ते", "दुनिया"];
        let translator = provider(dir.path(), &words, 2).build().unwrap();

        let complete = translator
            .finish(&Decoded {
                ids: vec![3, 4],
                finished: true,
            })
            .unwrap();
        assert_eq!(complete.text, "नमस्ते दुनिया");
        assert_eq!(complete.note, MACHINE_TRANSLATION_NOTE);

        let cut = translator
            .finish(&Decoded {
                ids: vec![3, 3],
                finished: false,
            })
            .unwrap();
        assert!(cut.note.starts_with("Output truncated after 2 tokens"));
    }

    #[test]
    fn tuple_outputs_yield_leading_tensor() {
        let logits = Tensor::zeros([1, 2, 4], (tch::Kind::Float, Device::Cpu));
        let output = IValue::Tuple(vec![IValue::Tensor(logits), IValue::Int(0)]);
        let tensor = first_tensor(output).unwrap();
        assert_eq!(tensor.size(), vec![1, 2, 4]);
    }

    #[test]
    fn non_tensor_outputs_are_rejected() {
        let err = first_tensor(IValue::Int(3)).unwrap_err();
        assert!(matches!(err, ServiceError::TranslationFailed(_)));
    }

    #[test]
    fn missing_tokenizer_is_reported() {
        let provider = TorchProvider {
            source_tokenizer_path: PathBuf::from("does/not/exist.json"),
            target_tokenizer_path: PathBuf::from("does/not/exist.json"),
            device: Device::Cpu,
            max_output_tokens: 8,
        };
        let err = provider.build().err().unwrap();
        assert!(matches!(err, ServiceError::Tokenizer(_)));
    }
}
