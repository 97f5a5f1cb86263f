//! Token emission for one validated kind template.
//!
//! Every kind renders into the same module shape. Only names, paths and literals vary, so
//! two generated modules differ exactly where their templates do.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use serde_json::Value;

use super::{
    template::{ArgumentTemplate, KindTemplate, SourceTemplate, WaiterTemplate},
    CodegenError,
};

const DEFAULT_CONVERTER: &str = "crate::marshaller::raw_to_present";

fn path(raw: &str) -> Result<syn::Path, CodegenError> {
    syn::parse_str(raw).map_err(CodegenError::Syntax)
}

fn literal(value: &Value) -> String {
    value.to_string()
}

fn argument(argument: &ArgumentTemplate) -> TokenStream {
    let ArgumentTemplate {
        name,
        doc,
        required,
        target,
        ..
    } = argument;
    let kind = format_ident!("{}", argument.kind.variant());
    let default = match &argument.default {
        Some(value) => {
            let value = literal(value);
            quote!(Some(#value))
        }
        None => quote!(None),
    };

    quote! {
        crate::schema::Argument {
            name: #name,
            doc: #doc,
            kind: crate::schema::ArgumentType::#kind,
            required: #required,
            default: #default,
            target: #target,
        }
    }
}

fn projection(waiter: &WaiterTemplate) -> TokenStream {
    let fields = waiter.result_arguments.iter().map(|(name, path)| {
        quote!(crate::schema::Projection { name: #name, path: #path })
    });
    quote!(crate::schema::WaiterSpec { projection: &[#(#fields),*] })
}

fn acceptor(name: &str, waiter: &WaiterTemplate) -> Result<TokenStream, CodegenError> {
    let function = format_ident!("{}", name);
    let body = match &waiter.acceptor {
        Some(acceptor) => {
            let acceptor = path(acceptor)?;
            quote!(#acceptor(observation))
        }
        None => quote! {
            let _ = observation;
            crate::waiter::Verdict::Accept
        },
    };

    Ok(quote! {
        fn #function(observation: &crate::waiter::Observation) -> crate::waiter::Verdict {
            #body
        }
    })
}

fn argument_docs(arguments: &[ArgumentTemplate]) -> Vec<String> {
    if arguments.is_empty() {
        return Vec::new();
    }

    let mut docs = vec![String::new(), " Arguments:".to_string()];
    for argument in arguments {
        let kind = format!("{:?}", argument.kind).to_lowercase();
        let mut line = format!(" * `{}` ({kind}", argument.name);
        if argument.required {
            line.push_str(", required");
        }
        if let Some(default) = &argument.default {
            line.push_str(&format!(", default `{default}`"));
        }
        line.push(')');
        if !argument.doc.is_empty() {
            line.push_str(&format!(": {}", argument.doc));
        }
        docs.push(line);
    }
    docs
}

/// Emit `pub mod <kind> { .. }` for a template that already passed validation
pub fn kind_module(template: &KindTemplate) -> Result<TokenStream, CodegenError> {
    let function = &template.function;
    let hardcoded = &function.hardcoded;
    let policy = &function.policy;

    let module = format_ident!("{}", template.module());
    let reference = &function.reference;
    let resource = &hardcoded.resource;
    let payload = path(&hardcoded.payload_path)?;
    let payload_type = &hardcoded.payload_type;
    let converter = path(hardcoded.converter.as_deref().unwrap_or(DEFAULT_CONVERTER))?;

    let api_class = &hardcoded.api_class;
    let get = &hardcoded.get_function;
    let create = &hardcoded.create_function;
    let update = &hardcoded.update_function;
    let delete = &hardcoded.delete_function;
    let list = &hardcoded.list_function;
    let waiter = &hardcoded.waiter_function;

    let arguments = template.arguments.iter().map(argument);
    let state_parameters = hardcoded.state_parameters.iter().map(|(name, parameter)| {
        let source = match (parameter.source, &parameter.default) {
            (SourceTemplate::Merge, _) => quote!(Merge),
            (SourceTemplate::PassThrough, _) => quote!(PassThrough),
            (SourceTemplate::Default, default) => {
                let default = literal(default.as_ref().unwrap_or(&Value::Null));
                quote!(Default(#default))
            }
        };
        quote! {
            crate::schema::StateParameter {
                name: #name,
                source: crate::schema::ParameterSource::#source,
            }
        }
    });

    let keep_status = policy.keep_status;
    let ordered_fields = &policy.ordered_fields;
    let preserve_unknown_fields = policy.preserve_unknown_fields;
    let recreate_on_missing = policy.recreate_on_missing;

    let create_projection = projection(&function.waiters.create);
    let delete_projection = projection(&function.waiters.delete);
    let create_acceptor = acceptor("create_acceptor", &function.waiters.create)?;
    let delete_acceptor = acceptor("delete_acceptor", &function.waiters.delete)?;

    let module_doc = format!(" `{reference}`, reconciled as [`{payload_type}`]({}).", hardcoded.payload_path);
    let present_doc = format!(" Drive a `{resource}` to the desired state.");
    let argument_docs = argument_docs(&template.arguments);
    let absent_doc = format!(" Delete a `{resource}` and wait until it is gone.");
    let describe_doc = format!(" Export every `{resource}` in a form `present` accepts unchanged.");

    Ok(quote! {
        #[doc = #module_doc]
        pub mod #module {
            use std::sync::Arc;

            pub const REF: crate::cluster::ApiRef = crate::cluster::ApiRef {
                group: <#payload as k8s_openapi::Resource>::GROUP,
                version: <#payload as k8s_openapi::Resource>::VERSION,
                api_version: <#payload as k8s_openapi::Resource>::API_VERSION,
                kind: <#payload as k8s_openapi::Resource>::KIND,
                plural: <#payload as k8s_openapi::Resource>::URL_PATH_SEGMENT,
            };

            pub static SPEC: crate::schema::KindSpec = crate::schema::KindSpec {
                reference: #reference,
                resource: #resource,
                api: REF,
                operations: crate::schema::Operations {
                    api_class: #api_class,
                    get: #get,
                    create: #create,
                    update: #update,
                    delete: #delete,
                    list: #list,
                    waiter: #waiter,
                },
                payload_type: #payload_type,
                arguments: &[#(#arguments),*],
                state_parameters: &[#(#state_parameters),*],
                policy: crate::schema::StatePolicy {
                    keep_status: #keep_status,
                    ordered_fields: &[#(#ordered_fields),*],
                    preserve_unknown_fields: #preserve_unknown_fields,
                    recreate_on_missing: #recreate_on_missing,
                },
                waiters: crate::schema::Waiters {
                    create: #create_projection,
                    delete: #delete_projection,
                },
            };

            fn marshal(
                desired: &::serde_json::Value,
            ) -> Result<::serde_json::Value, crate::marshaller::MarshalError> {
                crate::marshaller::unmarshal::<#payload>(&SPEC, desired)
            }

            #create_acceptor

            #delete_acceptor

            pub fn controller() -> crate::engine::ResourceController {
                crate::engine::ResourceController::new(
                    &SPEC,
                    marshal,
                    #converter,
                    crate::waiter::Acceptors::new(Arc::new(create_acceptor), Arc::new(delete_acceptor)),
                )
            }

            #[doc = #present_doc]
            #(#[doc = #argument_docs])*
            pub async fn present(
                ctx: &crate::context::Context,
                request: crate::engine::PresentRequest,
            ) -> crate::engine::OperationResult {
                controller().present(ctx, request).await
            }

            #[doc = #absent_doc]
            pub async fn absent(
                ctx: &crate::context::Context,
                request: crate::engine::AbsentRequest,
            ) -> crate::engine::OperationResult {
                controller().absent(ctx, request).await
            }

            #[doc = #describe_doc]
            pub async fn describe(
                ctx: &crate::context::Context,
            ) -> crate::Result<crate::engine::Described> {
                controller().describe(ctx).await
            }
        }
    })
}

/// Emit `pub fn registry()` listing every rendered kind
pub fn registry(templates: &[KindTemplate]) -> TokenStream {
    let modules = templates
        .iter()
        .map(|template| format_ident!("{}", template.module()));

    quote! {
        /// One controller per kind template
        pub fn registry() -> Vec<crate::engine::ResourceController> {
            vec![#(#modules::controller()),*]
        }
    }
}
