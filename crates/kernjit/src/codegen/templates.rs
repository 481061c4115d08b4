//! CUDA source templates.
//!
//! The templates only instantiate kernels declared in the kernjit headers and
//! expose a C entry point per variant; the kernels themselves live in
//! `include/kernjit/`.

/// Fused `act(x) * y` over the two halves of the last dimension.
pub const ACT_AND_MUL_TEMPLATE: &str = r#"// Generated by kernjit. Do not edit.
#include <cuda_fp16.h>
#include <cuda_bf16.h>
#include <cuda_runtime.h>
#include <kernjit/activation.cuh>

using namespace kernjit;

{{act_func_def}}

template <typename T>
static cudaError_t {{func_name}}_launch(T* out, const T* input, int64_t num_tokens, int64_t d,
                                        cudaStream_t stream) {
  uint32_t vec_size = 16 / sizeof(T);
  dim3 grid(num_tokens);
  dim3 block(std::min(d / vec_size, int64_t(1024)));
  activation::act_and_mul_kernel<T, {{act_func_name}}><<<grid, block, 0, stream>>>(out, input, d);
  return cudaGetLastError();
}

extern "C" int {{func_name}}(void* out, const void* input, int64_t num_tokens, int64_t d,
                             int dtype, cudaStream_t stream) {
  switch (dtype) {
    case {{dtype_f16}}:
      return static_cast<int>({{func_name}}_launch(static_cast<half*>(out),
                                                   static_cast<const half*>(input),
                                                   num_tokens, d, stream));
    case {{dtype_bf16}}:
      return static_cast<int>({{func_name}}_launch(static_cast<nv_bfloat16*>(out),
                                                   static_cast<const nv_bfloat16*>(input),
                                                   num_tokens, d, stream));
    default:
      return static_cast<int>(cudaErrorInvalidValue);
  }
}
"#;

/// Shared prelude for attention instantiations.
const ATTENTION_PRELUDE: &str = r#"// Generated by kernjit. Do not edit.
#include <cuda_runtime.h>
#include <kernjit/attention/variants.cuh>
#include <kernjit/pos_enc.cuh>

using namespace kernjit;

using DTypeQ = {{dtype_q}};
using DTypeKV = {{dtype_kv}};
using DTypeO = {{dtype_o}};
"#;

/// Single-request decode.
pub fn single_decode_template() -> String {
    format!(
        "{ATTENTION_PRELUDE}{}",
        r#"#include <kernjit/attention/decode.cuh>

constexpr uint32_t HEAD_DIM = {{head_dim}};
constexpr PosEncodingMode POS_ENCODING_MODE = {{pos_encoding_mode}};
using AttentionVariant = DefaultAttention</*custom_mask=*/false, {{use_sliding_window}}, {{use_logits_soft_cap}}, /*alibi=*/{{use_alibi}}>;
using Params = SingleDecodeParams<DTypeQ, DTypeKV, DTypeO>;

extern "C" int {{uri}}_run(const Params* params, DTypeO* tmp, cudaStream_t stream) {
  return static_cast<int>(
      SingleDecodeWithKVCacheDispatched<HEAD_DIM, POS_ENCODING_MODE, AttentionVariant>(
          *params, tmp, stream));
}
"#
    )
}

/// Batched decode over a paged KV cache.
pub fn batch_decode_template() -> String {
    format!(
        "{ATTENTION_PRELUDE}{}",
        r#"#include <kernjit/attention/decode.cuh>
#include <kernjit/attention/scheduler.cuh>

using IdType = {{dtype_idx}};
constexpr uint32_t HEAD_DIM = {{head_dim}};
constexpr PosEncodingMode POS_ENCODING_MODE = {{pos_encoding_mode}};
using AttentionVariant = DefaultAttention</*custom_mask=*/false, {{use_sliding_window}}, {{use_logits_soft_cap}}, /*alibi=*/{{use_alibi}}>;
using Params = BatchDecodeParams<DTypeQ, DTypeKV, DTypeO, IdType>;

extern "C" int {{uri}}_plan(void* float_buffer, size_t float_bytes, void* int_buffer,
                            size_t int_bytes, DecodePlanInfo* plan_info, const IdType* indptr_h,
                            uint32_t batch_size, uint32_t num_qo_heads, uint32_t num_kv_heads,
                            uint32_t page_size, cudaStream_t stream) {
  return static_cast<int>(DecodePlan<HEAD_DIM, POS_ENCODING_MODE, AttentionVariant, Params>(
      float_buffer, float_bytes, int_buffer, int_bytes, *plan_info, indptr_h, batch_size,
      num_qo_heads, num_kv_heads, page_size, stream));
}

extern "C" int {{uri}}_run(Params* params, DTypeO* tmp_v, float* tmp_s, cudaStream_t stream) {
  return static_cast<int>(
      BatchDecodeWithPagedKVCacheDispatched<HEAD_DIM, POS_ENCODING_MODE, AttentionVariant>(
          *params, tmp_v, tmp_s, stream));
}
"#
    )
}

/// Batched decode for multi-head latent attention.
pub fn batch_decode_mla_template() -> String {
    format!(
        "{ATTENTION_PRELUDE}{}",
        r#"#include <kernjit/attention/decode_mla.cuh>
#include <kernjit/attention/scheduler.cuh>

using IdType = {{dtype_idx}};
constexpr uint32_t HEAD_DIM_CKV = {{head_dim_ckv}};
constexpr uint32_t HEAD_DIM_KPE = {{head_dim_kpe}};
using AttentionVariant = DefaultAttention</*custom_mask=*/false, {{use_sliding_window}}, {{use_logits_soft_cap}}, /*alibi=*/false>;
using Params = BatchDecodeParamsMLA<DTypeQ, DTypeKV, DTypeO, IdType>;

extern "C" int {{uri}}_run(Params* params, DTypeO* tmp_v, float* tmp_s, cudaStream_t stream) {
  return static_cast<int>(
      BatchDecodeWithPagedKVCacheDispatchedMLA<HEAD_DIM_CKV, HEAD_DIM_KPE, AttentionVariant>(
          *params, tmp_v, tmp_s, stream));
}
"#
    )
}

/// Single-request prefill. The mask mode is dispatched at run time.
pub fn single_prefill_template() -> String {
    format!(
        "{ATTENTION_PRELUDE}{}",
        r#"#include <kernjit/attention/prefill.cuh>

constexpr uint32_t HEAD_DIM = {{head_dim}};
constexpr PosEncodingMode POS_ENCODING_MODE = {{pos_encoding_mode}};
constexpr bool USE_FP16_QK_REDUCTION = {{use_fp16_qk_reduction}};
using Params = SinglePrefillParams<DTypeQ, DTypeKV, DTypeO>;

extern "C" int {{uri}}_run(const Params* params, DTypeO* tmp, int mask_mode,
                           cudaStream_t stream) {
  return static_cast<int>(DISPATCH_MASK_MODE(static_cast<MaskMode>(mask_mode), MASK_MODE, {
    using AttentionVariant = DefaultAttention<MASK_MODE == MaskMode::kCustom, {{use_sliding_window}}, {{use_logits_soft_cap}}, /*alibi=*/{{use_alibi}}>;
    return SinglePrefillWithKVCacheDispatched<HEAD_DIM, POS_ENCODING_MODE, USE_FP16_QK_REDUCTION,
                                              MASK_MODE, AttentionVariant>(*params, tmp, stream);
  }));
}
"#
    )
}

/// Batched prefill over ragged and paged KV caches.
pub fn batch_prefill_template() -> String {
    format!(
        "{ATTENTION_PRELUDE}{}",
        r#"#include <kernjit/attention/prefill.cuh>
#include <kernjit/attention/scheduler.cuh>

using IdType = {{dtype_idx}};
constexpr uint32_t HEAD_DIM = {{head_dim}};
constexpr PosEncodingMode POS_ENCODING_MODE = {{pos_encoding_mode}};
constexpr bool USE_FP16_QK_REDUCTION = {{use_fp16_qk_reduction}};
using RaggedParams = BatchPrefillRaggedParams<DTypeQ, DTypeKV, DTypeO, IdType>;
using PagedParams = BatchPrefillPagedParams<DTypeQ, DTypeKV, DTypeO, IdType>;

extern "C" int {{uri}}_plan(void* float_buffer, size_t float_bytes, void* int_buffer,
                            size_t int_bytes, PrefillPlanInfo* plan_info, const IdType* qo_indptr_h,
                            const IdType* kv_indptr_h, uint32_t batch_size, uint32_t num_qo_heads,
                            uint32_t num_kv_heads, uint32_t page_size, cudaStream_t stream) {
  return static_cast<int>(PrefillPlan<IdType>(float_buffer, float_bytes, int_buffer, int_bytes,
                                               *plan_info, qo_indptr_h, kv_indptr_h, batch_size,
                                               num_qo_heads, num_kv_heads, HEAD_DIM, page_size,
                                               stream));
}

extern "C" int {{uri}}_ragged_run(RaggedParams* params, DTypeO* tmp_v, float* tmp_s,
                                  int mask_mode, cudaStream_t stream) {
  return static_cast<int>(DISPATCH_MASK_MODE(static_cast<MaskMode>(mask_mode), MASK_MODE, {
    using AttentionVariant = DefaultAttention<MASK_MODE == MaskMode::kCustom, {{use_sliding_window}}, {{use_logits_soft_cap}}, /*alibi=*/{{use_alibi}}>;
    return BatchPrefillWithRaggedKVCacheDispatched<HEAD_DIM, POS_ENCODING_MODE,
                                                   USE_FP16_QK_REDUCTION, MASK_MODE,
                                                   AttentionVariant>(*params, tmp_v, tmp_s, stream);
  }));
}

extern "C" int {{uri}}_paged_run(PagedParams* params, DTypeO* tmp_v, float* tmp_s,
                                 int mask_mode, cudaStream_t stream) {
  return static_cast<int>(DISPATCH_MASK_MODE(static_cast<MaskMode>(mask_mode), MASK_MODE, {
    using AttentionVariant = DefaultAttention<MASK_MODE == MaskMode::kCustom, {{use_sliding_window}}, {{use_logits_soft_cap}}, /*alibi=*/{{use_alibi}}>;
    return BatchPrefillWithPagedKVCacheDispatched<HEAD_DIM, POS_ENCODING_MODE,
                                                  USE_FP16_QK_REDUCTION, MASK_MODE,
                                                  AttentionVariant>(*params, tmp_v, tmp_s, stream);
  }));
}
"#
    )
}
