use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use super::config::DecoderConfig;
use super::error::ModelError;
use super::layers::{apply_mask, Dropout, Embedding, Linear, LstmLayer, LstmStepCache, Param};
use crate::utils::weighted_cross_entropy;

/// Token fed at padded positions; it never carries loss weight
const PAD_TOKEN: usize = 0;

/// What the first LSTM layer consumed at one timestep
#[derive(Debug, Clone)]
enum StepInput {
    Image,
    Tokens(Vec<usize>),
}

#[derive(Debug, Clone)]
struct StepCache {
    input: StepInput,
    layers: Vec<LstmStepCache>,
    input_masks: Vec<Option<Array2<f32>>>,
    /// Top hidden state after dropout, the input of the output projection
    top: Array2<f32>,
    top_mask: Option<Array2<f32>>,
    targets: Vec<usize>,
    weights: Vec<f32>,
}

/// Everything `backward` needs from one forward pass
#[derive(Debug, Clone)]
pub struct ForwardCache {
    loss: f32,
    features: Array2<f32>,
    steps: Vec<StepCache>,
}

impl ForwardCache {
    pub fn loss(&self) -> f32 {
        self.loss
    }

    pub fn batch_size(&self) -> usize {
        self.features.nrows()
    }

    /// Number of recurrent steps, the image step included
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }
}

/// LSTM caption decoder conditioned on an image feature.
///
/// The projected image feature is the input of the first timestep; after that the
/// ground-truth tokens are fed one by one and each step scores the next token.
#[derive(Debug, Clone)]
pub struct CaptionDecoder {
    config: DecoderConfig,
    embed: Embedding,
    image_proj: Linear,
    lstm: Vec<LstmLayer>,
    output: Linear,
    dropout: Dropout,
    training: bool,
    rng: StdRng,
}

impl CaptionDecoder {
    pub fn new(config: DecoderConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let hidden = config.hidden_dim;

        let embed = Embedding::new(config.vocab_size, hidden, &mut rng)?;
        let image_proj = Linear::new(config.feature_dim, hidden, &mut rng)?;
        let lstm = (0..config.num_layers)
            .map(|_| LstmLayer::new(hidden, hidden, &mut rng))
            .collect::<Result<Vec<_>, _>>()?;
        let output = Linear::new(hidden, config.vocab_size, &mut rng)?;

        Ok(Self {
            dropout: Dropout::new(config.dropout),
            config,
            embed,
            image_proj,
            lstm,
            output,
            training: true,
            rng,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Shape of the zeroed initial state the caller has to provide
    pub fn state_shape(&self, batch_size: usize) -> (usize, usize, usize) {
        (self.config.num_layers, batch_size, self.config.hidden_dim)
    }

    /// Teacher-forced forward pass.
    ///
    /// The loss is the mean token cross-entropy of each caption, averaged over the batch.
    pub fn forward(
        &mut self,
        hx: &Array3<f32>,
        cx: &Array3<f32>,
        captions: &[Vec<usize>],
        features: &Array2<f32>,
    ) -> Result<ForwardCache, ModelError> {
        self.check_inputs(hx, cx, captions, features)?;
        let batch = captions.len();

        let mut h: Vec<Array2<f32>> = hx.outer_iter().map(|s| s.to_owned()).collect();
        let mut c: Vec<Array2<f32>> = cx.outer_iter().map(|s| s.to_owned()).collect();

        let projected = self.image_proj.forward(features.view());
        let mut steps = vec![self.run_step(StepInput::Image, projected, &mut h, &mut c)?];

        let max_len = captions.iter().map(Vec::len).max().unwrap_or(0);
        let mut loss = 0.0;
        for t in 0..max_len - 1 {
            let tokens: Vec<usize> = captions
                .iter()
                .map(|caption| caption.get(t).copied().unwrap_or(PAD_TOKEN))
                .collect();
            let embedded = self.embed.forward(&tokens);
            let mut step = self.run_step(StepInput::Tokens(tokens), embedded, &mut h, &mut c)?;

            for caption in captions {
                match caption.get(t + 1) {
                    Some(&target) => {
                        step.targets.push(target);
                        step.weights.push(1.0 / ((caption.len() - 1) * batch) as f32);
                    }
                    None => {
                        step.targets.push(PAD_TOKEN);
                        step.weights.push(0.0);
                    }
                }
            }

            let logits = self.output.forward(step.top.view());
            let (step_loss, _) = weighted_cross_entropy(logits.view(), &step.targets, &step.weights);
            loss += step_loss;
            steps.push(step);
        }

        if !loss.is_finite() {
            return Err(ModelError::NonFinite(loss));
        }
        debug!(batch, steps = steps.len(), loss, "decoder forward");

        Ok(ForwardCache { loss, features: features.clone(), steps })
    }

    /// Backpropagation through time. Gradients are added to whatever is
    /// already stored on the parameters.
    pub fn backward(&mut self, cache: &ForwardCache) -> Result<(), ModelError> {
        let batch = cache.batch_size();
        let hidden = self.config.hidden_dim;
        let layers = self.config.num_layers;
        if cache.steps.iter().any(|s| s.layers.len() != layers) {
            return Err(ModelError::InvalidInput(
                "forward cache was produced by a model with another depth".to_string(),
            ));
        }

        let mut dh_next = vec![Array2::<f32>::zeros((batch, hidden)); layers];
        let mut dc_next = vec![Array2::<f32>::zeros((batch, hidden)); layers];

        for step in cache.steps.iter().rev() {
            let mut d_above = if step.targets.is_empty() {
                Array2::zeros((batch, hidden))
            } else {
                let logits = self.output.forward(step.top.view());
                let (_, dlogits) =
                    weighted_cross_entropy(logits.view(), &step.targets, &step.weights);
                let mut d_top = self.output.backward(step.top.view(), dlogits.view());
                apply_mask(&mut d_top, step.top_mask.as_ref());
                d_top
            };

            for l in (0..layers).rev() {
                let dh = &dh_next[l] + &d_above;
                let grads = self.lstm[l].backward_step(&step.layers[l], dh.view(), dc_next[l].view());
                dh_next[l] = grads.dh_prev;
                dc_next[l] = grads.dc_prev;

                d_above = grads.dx;
                apply_mask(&mut d_above, step.input_masks[l].as_ref());
            }

            match &step.input {
                StepInput::Image => {
                    self.image_proj.backward(cache.features.view(), d_above.view());
                }
                StepInput::Tokens(tokens) => self.embed.backward(tokens, d_above.view()),
            }
        }

        Ok(())
    }

    fn run_step(
        &mut self,
        input: StepInput,
        mut x: Array2<f32>,
        h: &mut [Array2<f32>],
        c: &mut [Array2<f32>],
    ) -> Result<StepCache, ModelError> {
        let mut layer_caches = Vec::with_capacity(self.lstm.len());
        let mut input_masks = Vec::with_capacity(self.lstm.len());

        for (l, layer) in self.lstm.iter().enumerate() {
            let mask = self.dropout.sample_mask(x.dim(), self.training, &mut self.rng);
            apply_mask(&mut x, mask.as_ref());

            let (h_new, c_new, cache) = layer.step(x.view(), h[l].view(), c[l].view())?;
            x = h_new.clone();
            h[l] = h_new;
            c[l] = c_new;
            layer_caches.push(cache);
            input_masks.push(mask);
        }

        let top_mask = self.dropout.sample_mask(x.dim(), self.training, &mut self.rng);
        apply_mask(&mut x, top_mask.as_ref());

        Ok(StepCache {
            input,
            layers: layer_caches,
            input_masks,
            top: x,
            top_mask,
            targets: Vec::new(),
            weights: Vec::new(),
        })
    }

    fn check_inputs(
        &self,
        hx: &Array3<f32>,
        cx: &Array3<f32>,
        captions: &[Vec<usize>],
        features: &Array2<f32>,
    ) -> Result<(), ModelError> {
        let batch = captions.len();
        if batch == 0 {
            return Err(ModelError::InvalidInput("empty batch".to_string()));
        }
        let expected = (batch, self.config.feature_dim);
        if features.dim() != expected {
            return Err(ModelError::dims("image features", expected, features.dim()));
        }
        let state = self.state_shape(batch);
        if hx.dim() != state {
            return Err(ModelError::dims("initial hidden state", state, hx.dim()));
        }
        if cx.dim() != state {
            return Err(ModelError::dims("initial cell state", state, cx.dim()));
        }
        for (i, caption) in captions.iter().enumerate() {
            if caption.len() < 2 {
                return Err(ModelError::InvalidInput(format!(
                    "caption {i} has {} tokens, at least 2 are needed",
                    caption.len()
                )));
            }
            if let Some(&token) = caption.iter().find(|&&t| t >= self.config.vocab_size) {
                return Err(ModelError::InvalidInput(format!(
                    "caption {i} contains token {token} outside the vocabulary of {}",
                    self.config.vocab_size
                )));
            }
        }
        Ok(())
    }

    /// Parameters in their fixed order
    pub fn params(&self) -> Vec<&Param> {
        let mut params = vec![&self.embed.weight];
        params.extend(self.image_proj.params());
        for layer in &self.lstm {
            params.extend(layer.params());
        }
        params.extend(self.output.params());
        params
    }

    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = vec![&mut self.embed.weight];
        params.extend(self.image_proj.params_mut());
        for layer in &mut self.lstm {
            params.extend(layer.params_mut());
        }
        params.extend(self.output.params_mut());
        params
    }

    /// Stable parameter names, in the same order as `params()`
    pub fn param_names(&self) -> Vec<String> {
        let mut names = vec![
            "embed.weight".to_string(),
            "image_proj.weight".to_string(),
            "image_proj.bias".to_string(),
        ];
        for l in 0..self.lstm.len() {
            for part in ["w_x", "w_h", "bias"] {
                names.push(format!("lstm.{l}.{part}"));
            }
        }
        names.push("output.weight".to_string());
        names.push("output.bias".to_string());
        names
    }

    pub fn named_params(&self) -> Vec<(String, &Param)> {
        self.param_names().into_iter().zip(self.params()).collect()
    }

    pub fn param_shapes(&self) -> Vec<(usize, usize)> {
        self.params().iter().map(|p| p.shape()).collect()
    }

    pub fn parameter_count(&self) -> usize {
        self.params().iter().map(|p| p.value.len()).sum()
    }

    pub fn clear_gradients(&mut self) {
        for param in self.params_mut() {
            param.zero_grad();
        }
    }

    /// L2 norm over every gradient
    pub fn gradient_norm(&self) -> f32 {
        self.params()
            .iter()
            .map(|p| p.grad.iter().map(|g| g * g).sum::<f32>())
            .sum::<f32>()
            .sqrt()
    }

    /// Copies of every parameter value keyed by name
    pub fn state_dict(&self) -> Vec<(String, Array2<f32>)> {
        self.named_params()
            .into_iter()
            .map(|(name, param)| (name, param.value.clone()))
            .collect()
    }

    /// Restores values produced by `state_dict`. Nothing is assigned unless
    /// every name is present with the expected shape.
    pub fn load_state_dict(&mut self, values: &[(String, Array2<f32>)]) -> Result<(), ModelError> {
        let names = self.param_names();
        if values.len() != names.len() {
            return Err(ModelError::dims("parameter count", names.len(), values.len()));
        }
        for ((name, shape), (got_name, value)) in
            names.iter().zip(self.param_shapes()).zip(values)
        {
            if name != got_name {
                return Err(ModelError::InvalidInput(format!(
                    "expected parameter {name}, found {got_name}"
                )));
            }
            if value.dim() != shape {
                return Err(ModelError::dims(name, shape, value.dim()));
            }
        }

        for (param, (_, value)) in self.params_mut().into_iter().zip(values) {
            param.set_value(value.clone())?;
        }
        Ok(())
    }
}

/// Zeroed `(hx, cx)` for a batch
pub fn zero_state(shape: (usize, usize, usize)) -> (Array3<f32>, Array3<f32>) {
    (Array3::zeros(shape), Array3::zeros(shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Axis};

    fn config(dropout: f32, num_layers: usize) -> DecoderConfig {
        DecoderConfig {
            vocab_size: 6,
            hidden_dim: 3,
            feature_dim: 4,
            num_layers,
            dropout,
            seed: 11,
        }
    }

    fn batch() -> (Vec<Vec<usize>>, Array2<f32>) {
        let captions = vec![vec![1, 2, 3, 5], vec![4, 2]];
        let features =
            Array2::from_shape_fn((2, 4), |(i, j)| ((i * 4 + j) as f32 * 0.37).sin());
        (captions, features)
    }

    fn loss_of(model: &mut CaptionDecoder) -> f32 {
        let (captions, features) = batch();
        let (hx, cx) = zero_state(model.state_shape(captions.len()));
        model.forward(&hx, &cx, &captions, &features).unwrap().loss()
    }

    fn forward_backward(model: &mut CaptionDecoder) {
        let (captions, features) = batch();
        let (hx, cx) = zero_state(model.state_shape(captions.len()));
        let cache = model.forward(&hx, &cx, &captions, &features).unwrap();
        model.backward(&cache).unwrap();
    }

    #[test]
    fn test_parameter_layout() {
        let model = CaptionDecoder::new(config(0.5, 2)).unwrap();
        let names = model.param_names();
        assert_eq!(names.len(), 3 + 2 * 3 + 2);
        assert_eq!(names[3], "lstm.0.w_x");
        assert_eq!(model.params().len(), names.len());

        let (_, embed) = &model.named_params()[0];
        assert_eq!(embed.shape(), (6, 3));
        assert_eq!(model.named_params()[4].1.shape(), (3, 12));
        assert_eq!(model.parameter_count(), 18 + 12 + 3 + 2 * (36 + 36 + 12) + 18 + 6);
    }

    #[test]
    fn test_forward_steps_and_finite_loss() {
        let mut model = CaptionDecoder::new(config(0.0, 1)).unwrap();
        let (captions, features) = batch();
        let (hx, cx) = zero_state(model.state_shape(2));
        let cache = model.forward(&hx, &cx, &captions, &features).unwrap();

        // image step plus one step per predicted token of the longest caption
        assert_eq!(cache.num_steps(), 4);
        assert_eq!(cache.batch_size(), 2);
        assert!(cache.loss().is_finite());
        assert!(cache.loss() > 0.0);
    }

    #[test]
    fn test_gradients_match_finite_difference() {
        let mut model = CaptionDecoder::new(config(0.0, 2)).unwrap();
        model.eval();
        forward_backward(&mut model);

        let eps = 1e-2;
        let probes = [(0, 2, 1), (1, 3, 0), (2, 0, 2), (3, 1, 7), (5, 0, 11), (7, 2, 4), (9, 1, 5)];
        for (index, r, c) in probes {
            let analytic = model.params()[index].grad[[r, c]];

            let mut plus = model.clone();
            plus.params_mut()[index].value[[r, c]] += eps;
            let mut minus = model.clone();
            minus.params_mut()[index].value[[r, c]] -= eps;
            let numeric = (loss_of(&mut plus) - loss_of(&mut minus)) / (2.0 * eps);

            assert_abs_diff_eq!(analytic, numeric, epsilon = 5e-3);
        }
    }

    #[test]
    fn test_gradients_accumulate_until_cleared() {
        let mut model = CaptionDecoder::new(config(0.0, 1)).unwrap();
        model.eval();

        forward_backward(&mut model);
        let once: Vec<Array2<f32>> = model.params().iter().map(|p| p.grad.clone()).collect();
        forward_backward(&mut model);
        for (param, first) in model.params().iter().zip(&once) {
            assert_abs_diff_eq!(param.grad, first * 2.0, epsilon = 1e-5);
        }

        model.clear_gradients();
        assert_eq!(model.gradient_norm(), 0.0);
    }

    #[test]
    fn test_dropout_only_in_training_mode() {
        let mut model = CaptionDecoder::new(config(0.5, 1)).unwrap();
        assert!(model.is_training());
        let a = loss_of(&mut model);
        let b = loss_of(&mut model);
        assert_ne!(a, b);

        model.eval();
        assert!(!model.is_training());
        assert_eq!(loss_of(&mut model), loss_of(&mut model));
    }

    #[test]
    fn test_loss_is_mean_per_caption() {
        let mut model = CaptionDecoder::new(config(0.0, 1)).unwrap();
        model.eval();
        let (captions, features) = batch();

        let mut separate = Vec::new();
        for i in 0..2 {
            let (hx, cx) = zero_state(model.state_shape(1));
            let single = features.row(i).to_owned().insert_axis(Axis(0));
            let cache = model.forward(&hx, &cx, &captions[i..=i], &single).unwrap();
            separate.push(cache.loss());
        }

        let joint = loss_of(&mut model);
        assert_abs_diff_eq!(joint, Array1::from(separate).mean().unwrap(), epsilon = 1e-5);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let mut model = CaptionDecoder::new(config(0.0, 2)).unwrap();
        let (captions, features) = batch();
        let (hx, cx) = zero_state(model.state_shape(2));

        let (bad_hx, _) = zero_state((1, 2, 3));
        assert!(model.forward(&bad_hx, &cx, &captions, &features).is_err());
        assert!(model.forward(&hx, &cx, &captions[..1], &features).is_err());
        assert!(model.forward(&hx, &cx, &[vec![1, 9], vec![1, 2]], &features).is_err());
        assert!(model.forward(&hx, &cx, &[vec![1], vec![1, 2]], &features).is_err());
        assert!(matches!(
            model.forward(&hx, &cx, &[], &Array2::zeros((0, 4))),
            Err(ModelError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_state_dict_round_trip() {
        let source = CaptionDecoder::new(config(0.5, 1)).unwrap();
        let mut target = CaptionDecoder::new(DecoderConfig { seed: 99, ..config(0.5, 1) }).unwrap();
        assert_ne!(source.params()[0].value, target.params()[0].value);

        target.load_state_dict(&source.state_dict()).unwrap();
        for (a, b) in source.params().iter().zip(target.params()) {
            assert_eq!(a.value, b.value);
        }

        let mut wrong = source.state_dict();
        wrong[0].1 = Array2::zeros((7, 3));
        let before = target.params()[1].value.clone();
        assert!(target.load_state_dict(&wrong).is_err());
        assert_eq!(target.params()[1].value, before);
    }
}
